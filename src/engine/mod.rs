//! Final-grade bookkeeping for quizzes.
//!
//! [`GradingEngine`] owns no state of its own; every read and write goes
//! through the collaborators handed to [`GradingEngine::new`]. Entry points:
//!
//! - [`GradingEngine::recompute_sum_grades`] after the question structure changes;
//! - [`GradingEngine::update_final_grade`] after one learner finishes an attempt;
//! - [`GradingEngine::recompute_all_final_grades`] to bring every learner up to date;
//! - [`GradingEngine::set_maximum_grade`] when the quiz's grade scale is edited.

mod final_grade;
mod max_grade;
mod recompute;
mod report;
mod sumgrades;

pub use final_grade::{final_grade_for, FinalGrade, GradeWrite};
pub use max_grade::{MaxGradeChange, RescaleStrategy};
pub use recompute::{GradeChange, RecomputeSummary};
pub use report::GradeReport;
pub use sumgrades::SumGradesOutcome;

use crate::error::{GradingError, Result};
use crate::store::sqlite::SqliteStore;
use crate::store::{
    AttemptStore, EventPublisher, FeedbackBandStore, GradeStore, GradebookEntry, GradebookSync,
    QuestionStructure, QuizContext, QuizStore, UnitOfWork,
};

pub struct Collaborators<'a> {
    pub quizzes: &'a dyn QuizStore,
    pub slots: &'a dyn QuestionStructure,
    pub attempts: &'a dyn AttemptStore,
    pub grades: &'a dyn GradeStore,
    pub feedback: &'a dyn FeedbackBandStore,
    pub gradebook: &'a dyn GradebookSync,
    pub events: &'a dyn EventPublisher,
    pub unit_of_work: &'a dyn UnitOfWork,
}

impl<'a> Collaborators<'a> {
    /// Every collaborator served by one workspace database.
    pub fn sqlite(store: &'a SqliteStore<'_>) -> Self {
        Self {
            quizzes: store,
            slots: store,
            attempts: store,
            grades: store,
            feedback: store,
            gradebook: store,
            events: store,
            unit_of_work: store,
        }
    }

    pub fn with_gradebook(mut self, gradebook: &'a dyn GradebookSync) -> Self {
        self.gradebook = gradebook;
        self
    }

    pub fn with_events(mut self, events: &'a dyn EventPublisher) -> Self {
        self.events = events;
        self
    }
}

pub struct GradingEngine<'a> {
    stores: Collaborators<'a>,
}

impl<'a> GradingEngine<'a> {
    pub fn new(stores: Collaborators<'a>) -> Self {
        Self { stores }
    }

    pub fn quiz(&self, quiz_id: &str) -> Result<QuizContext> {
        self.stores
            .quizzes
            .load_quiz(quiz_id)?
            .ok_or_else(|| GradingError::QuizNotFound(quiz_id.to_string()))
    }

    /// Hand every stored grade of the quiz to the gradebook again.
    pub fn sync_gradebook(&self, quiz_id: &str) -> Result<usize> {
        let entries: Vec<GradebookEntry> = self
            .stores
            .grades
            .quiz_grades(quiz_id)?
            .into_iter()
            .map(|r| GradebookEntry {
                user_id: r.user_id,
                grade: Some(r.grade),
            })
            .collect();
        if !entries.is_empty() {
            self.stores.gradebook.push_grades(quiz_id, &entries)?;
        }
        Ok(entries.len())
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
