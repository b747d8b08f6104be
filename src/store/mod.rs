//! Seams between the grading engine and the systems it reads from and writes to.
//!
//! Every trait here is implemented by [`sqlite::SqliteStore`]; tests swap in
//! their own doubles for the outward-facing sinks.

pub mod sqlite;

use serde::Serialize;
use std::collections::HashMap;

use crate::calc::{AttemptSummary, FeedbackBand, GradeMethod};
use crate::error::Result;

/// The quiz values grading depends on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizContext {
    pub id: String,
    pub max_grade: f64,
    pub sum_grades: f64,
    pub grade_method: GradeMethod,
    pub allowed_attempts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotMark {
    pub slot_id: String,
    pub max_mark: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRecord {
    pub user_id: String,
    pub grade: f64,
    pub last_modified: i64,
}

/// A learner's current grade as handed to the gradebook. `None` clears it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradebookEntry {
    pub user_id: String,
    pub grade: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeUpdatedEvent {
    pub quiz_id: String,
    pub old_grade: f64,
    pub new_grade: f64,
}

pub trait QuizStore {
    fn load_quiz(&self, quiz_id: &str) -> Result<Option<QuizContext>>;
    fn set_sum_grades(&self, quiz_id: &str, sum_grades: f64) -> Result<()>;
    fn set_max_grade(&self, quiz_id: &str, max_grade: f64) -> Result<()>;
}

pub trait QuestionStructure {
    fn slot_max_marks(&self, quiz_id: &str) -> Result<Vec<SlotMark>>;
}

pub trait AttemptStore {
    /// True when a finished, non-preview attempt exists for the quiz.
    fn has_finished_attempts(&self, quiz_id: &str) -> Result<bool>;

    /// All non-preview attempts of one learner, ordered by attempt number.
    fn user_attempts(&self, quiz_id: &str, user_id: &str) -> Result<Vec<AttemptSummary>>;

    /// Raw aggregated grade for every learner with an eligible attempt,
    /// computed in bulk rather than per learner.
    fn aggregate_raw_grades(
        &self,
        quiz_id: &str,
        method: GradeMethod,
    ) -> Result<HashMap<String, f64>>;
}

pub trait GradeStore {
    fn user_grade(&self, quiz_id: &str, user_id: &str) -> Result<Option<GradeRecord>>;
    fn quiz_grades(&self, quiz_id: &str) -> Result<Vec<GradeRecord>>;

    /// Insert or overwrite grades for the given learners.
    fn upsert_grades(&self, quiz_id: &str, grades: &[(String, f64)], modified: i64)
        -> Result<()>;

    fn delete_grades(&self, quiz_id: &str, user_ids: &[String]) -> Result<usize>;

    /// Multiply every stored grade of the quiz by `factor`.
    fn scale_grades(&self, quiz_id: &str, factor: f64, modified: i64) -> Result<usize>;
}

pub trait FeedbackBandStore {
    fn feedback_bands(&self, quiz_id: &str) -> Result<Vec<FeedbackBand>>;
    fn scale_feedback_bands(&self, quiz_id: &str, factor: f64) -> Result<usize>;
}

pub trait GradebookSync {
    fn push_grades(&self, quiz_id: &str, entries: &[GradebookEntry]) -> Result<()>;
}

pub trait EventPublisher {
    fn publish(&self, event: &GradeUpdatedEvent) -> Result<()>;
}

/// Runs `work` so that either all of its writes persist or none do.
pub trait UnitOfWork {
    fn run(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()>;
}

/// Gradebook sink that drops everything; used when syncing is switched off.
pub struct NullGradebook;

impl GradebookSync for NullGradebook {
    fn push_grades(&self, _quiz_id: &str, _entries: &[GradebookEntry]) -> Result<()> {
        Ok(())
    }
}
