pub mod core;
pub mod grades;
pub mod quiz;
pub mod setup;
