use serde::Serialize;
use tracing::debug;

use super::{now_ts, GradingEngine};
use crate::calc::{aggregate_attempts, rescale_grade, AttemptSummary};
use crate::error::Result;
use crate::store::{GradebookEntry, QuizContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeWrite {
    Inserted,
    Updated,
    Deleted,
    /// No grade before and none after.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalGrade {
    pub user_id: String,
    pub grade: Option<f64>,
    pub previous: Option<f64>,
    pub write: GradeWrite,
}

/// A learner's final grade on the quiz's current scale, or `None` when no
/// attempt is eligible.
pub fn final_grade_for(quiz: &QuizContext, attempts: &[AttemptSummary]) -> Option<f64> {
    aggregate_attempts(quiz.grade_method, attempts)
        .map(|raw| rescale_grade(raw, quiz.max_grade, quiz.sum_grades))
}

impl GradingEngine<'_> {
    /// Recalculate and store one learner's final grade. Pass `attempts` when
    /// the caller already holds the learner's attempt list.
    pub fn update_final_grade(
        &self,
        quiz_id: &str,
        user_id: &str,
        attempts: Option<&[AttemptSummary]>,
    ) -> Result<FinalGrade> {
        let quiz = self.quiz(quiz_id)?;

        let loaded;
        let attempts = match attempts {
            Some(list) => list,
            None => {
                loaded = self.stores.attempts.user_attempts(quiz_id, user_id)?;
                &loaded[..]
            }
        };

        let grade = final_grade_for(&quiz, attempts);
        let previous = self
            .stores
            .grades
            .user_grade(quiz_id, user_id)?
            .map(|r| r.grade);

        let write = match (grade, previous) {
            (None, None) => GradeWrite::Unchanged,
            (None, Some(_)) => {
                self.stores
                    .grades
                    .delete_grades(quiz_id, &[user_id.to_string()])?;
                GradeWrite::Deleted
            }
            (Some(g), prev) => {
                self.stores
                    .grades
                    .upsert_grades(quiz_id, &[(user_id.to_string(), g)], now_ts())?;
                if prev.is_some() {
                    GradeWrite::Updated
                } else {
                    GradeWrite::Inserted
                }
            }
        };

        self.stores.gradebook.push_grades(
            quiz_id,
            &[GradebookEntry {
                user_id: user_id.to_string(),
                grade,
            }],
        )?;

        debug!(quiz_id, user_id, ?grade, ?write, "final grade updated");
        Ok(FinalGrade {
            user_id: user_id.to_string(),
            grade,
            previous,
            write,
        })
    }
}
