use serde::Serialize;

use super::GradingEngine;
use crate::calc::{best_attempt, feedback_for_grade, GradeMethod};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeReport {
    pub quiz_id: String,
    pub user_id: String,
    pub max_grade: f64,
    pub grade_method: GradeMethod,
    pub grade: Option<f64>,
    pub last_modified: Option<i64>,
    pub feedback: Option<String>,
    /// Attempt the grade is taken from; absent for AVERAGE.
    pub best_attempt: Option<i64>,
}

impl GradingEngine<'_> {
    /// Stored grade for one learner along with the feedback band it falls in.
    pub fn user_grade_report(&self, quiz_id: &str, user_id: &str) -> Result<GradeReport> {
        let quiz = self.quiz(quiz_id)?;
        let record = self.stores.grades.user_grade(quiz_id, user_id)?;

        let feedback = match &record {
            Some(r) => {
                let bands = self.stores.feedback.feedback_bands(quiz_id)?;
                feedback_for_grade(&bands, r.grade).map(|b| b.feedback_text.clone())
            }
            None => None,
        };

        let attempts = self.stores.attempts.user_attempts(quiz_id, user_id)?;
        let best = best_attempt(quiz.grade_method, &attempts).map(|a| a.attempt_number);

        Ok(GradeReport {
            quiz_id: quiz.id,
            user_id: user_id.to_string(),
            max_grade: quiz.max_grade,
            grade_method: quiz.grade_method,
            grade: record.as_ref().map(|r| r.grade),
            last_modified: record.as_ref().map(|r| r.last_modified),
            feedback,
            best_attempt: best,
        })
    }
}
