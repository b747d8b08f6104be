use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::info;

use super::{now_ts, GradingEngine};
use crate::calc::{grades_differ, rescale_grade};
use crate::error::Result;
use crate::store::{GradebookEntry, QuizContext};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeChange {
    pub user_id: String,
    pub old_grade: Option<f64>,
    pub new_grade: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeSummary {
    /// Set when the quiz has no marks to grade against and nothing was read.
    pub skipped: bool,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub changes: Vec<GradeChange>,
}

impl GradingEngine<'_> {
    /// Bring every learner's stored grade in line with their attempts,
    /// writing only the records that actually change.
    pub fn recompute_all_final_grades(&self, quiz_id: &str) -> Result<RecomputeSummary> {
        let quiz = self.quiz(quiz_id)?;
        self.recompute_for(&quiz)
    }

    pub(super) fn recompute_for(&self, quiz: &QuizContext) -> Result<RecomputeSummary> {
        let mut summary = RecomputeSummary::default();
        if quiz.sum_grades == 0.0 {
            info!(quiz_id = %quiz.id, "quiz has no marks, final grades left as they are");
            summary.skipped = true;
            return Ok(summary);
        }

        let raw_grades = self
            .stores
            .attempts
            .aggregate_raw_grades(&quiz.id, quiz.grade_method)?;
        let stored: HashMap<String, f64> = self
            .stores
            .grades
            .quiz_grades(&quiz.id)?
            .into_iter()
            .map(|r| (r.user_id, r.grade))
            .collect();

        let candidates: BTreeSet<&str> = stored
            .keys()
            .chain(raw_grades.keys())
            .map(String::as_str)
            .collect();

        let mut to_delete: Vec<String> = Vec::new();
        let mut to_write: Vec<(String, f64)> = Vec::new();
        for user_id in candidates {
            let old_grade = stored.get(user_id).copied();
            let new_grade = raw_grades
                .get(user_id)
                .map(|raw| rescale_grade(*raw, quiz.max_grade, quiz.sum_grades));

            if !grades_differ(old_grade, new_grade) {
                summary.unchanged += 1;
                continue;
            }
            match (old_grade, new_grade) {
                (_, None) => {
                    to_delete.push(user_id.to_string());
                    summary.deleted += 1;
                }
                (None, Some(g)) => {
                    to_write.push((user_id.to_string(), g));
                    summary.inserted += 1;
                }
                (Some(_), Some(g)) => {
                    to_write.push((user_id.to_string(), g));
                    summary.updated += 1;
                }
            }
            summary.changes.push(GradeChange {
                user_id: user_id.to_string(),
                old_grade,
                new_grade,
            });
        }

        if !to_delete.is_empty() {
            self.stores.grades.delete_grades(&quiz.id, &to_delete)?;
        }
        if !to_write.is_empty() {
            self.stores
                .grades
                .upsert_grades(&quiz.id, &to_write, now_ts())?;
        }
        if !summary.changes.is_empty() {
            let entries: Vec<GradebookEntry> = summary
                .changes
                .iter()
                .map(|c| GradebookEntry {
                    user_id: c.user_id.clone(),
                    grade: c.new_grade,
                })
                .collect();
            self.stores.gradebook.push_grades(&quiz.id, &entries)?;
        }

        info!(
            quiz_id = %quiz.id,
            method = quiz.grade_method.as_str(),
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            unchanged = summary.unchanged,
            "recomputed final grades"
        );
        Ok(summary)
    }
}
