use serde::Serialize;
use tracing::{info, warn};

use super::GradingEngine;
use crate::calc::ALMOST_ZERO;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SumGradesOutcome {
    pub quiz_id: String,
    pub sum_grades: f64,
    pub slot_count: usize,
    /// The quiz had finished attempts but no marks left, so its maximum
    /// grade was forced to zero.
    pub max_grade_zeroed: bool,
}

impl GradingEngine<'_> {
    /// Re-derive the quiz's total marks from its slots. Call after any slot
    /// is added, removed or reweighted.
    pub fn recompute_sum_grades(&self, quiz_id: &str) -> Result<SumGradesOutcome> {
        let quiz = self.quiz(quiz_id)?;
        let slots = self.stores.slots.slot_max_marks(&quiz.id)?;
        let sum_grades = slots.iter().fold(0.0_f64, |acc, s| acc + s.max_mark);
        self.stores.quizzes.set_sum_grades(&quiz.id, sum_grades)?;

        let mut max_grade_zeroed = false;
        if sum_grades < ALMOST_ZERO && self.stores.attempts.has_finished_attempts(&quiz.id)? {
            warn!(
                quiz_id,
                sum_grades, "quiz with finished attempts has no marks; zeroing maximum grade"
            );
            self.set_maximum_grade(&quiz.id, 0.0)?;
            max_grade_zeroed = true;
        }

        info!(quiz_id, sum_grades, slots = slots.len(), "sum grades recomputed");
        Ok(SumGradesOutcome {
            quiz_id: quiz.id,
            sum_grades,
            slot_count: slots.len(),
            max_grade_zeroed,
        })
    }
}
