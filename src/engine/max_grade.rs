use serde::Serialize;
use tracing::info;

use super::{now_ts, GradingEngine};
use crate::calc::ALMOST_ZERO;
use crate::error::{GradingError, Result};
use crate::store::{GradeUpdatedEvent, QuizContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RescaleStrategy {
    /// New maximum equals the old one; nothing was written.
    Unchanged,
    /// Grades were rebuilt from raw attempt scores.
    Recomputed,
    /// Stored grades were multiplied by `new / old`.
    Scaled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaxGradeChange {
    pub quiz_id: String,
    pub old_grade: f64,
    pub new_grade: f64,
    pub strategy: RescaleStrategy,
    pub grades_touched: usize,
    pub feedback_bands_scaled: usize,
}

impl GradingEngine<'_> {
    /// Change the quiz's maximum grade and move every stored grade and
    /// feedback band onto the new scale, atomically.
    pub fn set_maximum_grade(&self, quiz_id: &str, new_grade: f64) -> Result<MaxGradeChange> {
        if !new_grade.is_finite() || new_grade < 0.0 {
            return Err(GradingError::InvalidMaxGrade(new_grade));
        }
        let quiz = self.quiz(quiz_id)?;
        let old_grade = quiz.max_grade;

        if (new_grade - old_grade).abs() < ALMOST_ZERO {
            return Ok(MaxGradeChange {
                quiz_id: quiz.id,
                old_grade,
                new_grade: old_grade,
                strategy: RescaleStrategy::Unchanged,
                grades_touched: 0,
                feedback_bands_scaled: 0,
            });
        }

        let mut applied: Option<MaxGradeChange> = None;
        self.stores.unit_of_work.run(&mut || -> Result<()> {
            applied = Some(self.apply_max_grade(&quiz, new_grade)?);
            Ok(())
        })?;
        let change = applied.ok_or_else(|| GradingError::Collaborator {
            collaborator: "unit of work",
            message: "committed without running the rescale".into(),
        })?;

        info!(
            quiz_id,
            old_grade,
            new_grade,
            strategy = ?change.strategy,
            grades_touched = change.grades_touched,
            "maximum grade changed"
        );
        Ok(change)
    }

    fn apply_max_grade(&self, quiz: &QuizContext, new_grade: f64) -> Result<MaxGradeChange> {
        let old_grade = quiz.max_grade;
        self.stores.quizzes.set_max_grade(&quiz.id, new_grade)?;

        // Scaling up would magnify grades that were already rounded down on
        // the smaller scale, so an increase always rebuilds from raw scores.
        let (strategy, grades_touched) = if new_grade > old_grade {
            let rescaled = QuizContext {
                max_grade: new_grade,
                ..quiz.clone()
            };
            let summary = self.recompute_for(&rescaled)?;
            (RescaleStrategy::Recomputed, summary.changes.len())
        } else {
            let touched =
                self.stores
                    .grades
                    .scale_grades(&quiz.id, new_grade / old_grade, now_ts())?;
            self.sync_gradebook(&quiz.id)?;
            (RescaleStrategy::Scaled, touched)
        };

        let feedback_bands_scaled = if old_grade > ALMOST_ZERO {
            self.stores
                .feedback
                .scale_feedback_bands(&quiz.id, new_grade / old_grade)?
        } else {
            0
        };

        self.stores.events.publish(&GradeUpdatedEvent {
            quiz_id: quiz.id.clone(),
            old_grade,
            new_grade,
        })?;

        Ok(MaxGradeChange {
            quiz_id: quiz.id.clone(),
            old_grade,
            new_grade,
            strategy,
            grades_touched,
            feedback_bands_scaled,
        })
    }
}
