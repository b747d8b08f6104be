pub mod calc;
pub mod db;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod settings;
pub mod store;

#[cfg(test)]
mod test_support;
