use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use super::{
    AttemptStore, EventPublisher, FeedbackBandStore, GradeRecord, GradeStore, GradeUpdatedEvent,
    GradebookEntry, GradebookSync, QuestionStructure, QuizContext, QuizStore, SlotMark,
    UnitOfWork,
};
use crate::calc::{AttemptState, AttemptSummary, FeedbackBand, GradeMethod};
use crate::error::{GradingError, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const GRADE_UPDATED_EVENT: &str = "quiz_grade_updated";

const ELIGIBLE_ATTEMPTS: &str =
    "quiz_id = ?1 AND state = 'finished' AND preview = 0 AND sumgrades IS NOT NULL";

/// All grading stores backed by one workspace connection. Sharing the
/// connection is what lets [`UnitOfWork::run`] cover every store at once.
pub struct SqliteStore<'a> {
    conn: &'a Connection,
    chunk_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    pub seq: i64,
    pub quiz_id: String,
    pub event_name: String,
    pub old_grade: f64,
    pub new_grade: f64,
    pub created_at: i64,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Rows per multi-row statement in bulk writes.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn gradebook_entries(&self, quiz_id: &str) -> Result<Vec<GradebookEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, grade FROM gradebook_grades WHERE quiz_id = ? ORDER BY user_id",
        )?;
        let rows = stmt
            .query_map([quiz_id], |r| {
                Ok(GradebookEntry {
                    user_id: r.get(0)?,
                    grade: r.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn events(&self, quiz_id: &str) -> Result<Vec<StoredEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, quiz_id, event_name, old_grade, new_grade, created_at
             FROM grade_events
             WHERE quiz_id = ?
             ORDER BY seq",
        )?;
        let rows = stmt
            .query_map([quiz_id], |r| {
                Ok(StoredEvent {
                    seq: r.get(0)?,
                    quiz_id: r.get(1)?,
                    event_name: r.get(2)?,
                    old_grade: r.get(3)?,
                    new_grade: r.get(4)?,
                    created_at: r.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn placeholders(group: &str, count: usize) -> String {
    std::iter::repeat(group)
        .take(count)
        .collect::<Vec<_>>()
        .join(",")
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

impl QuizStore for SqliteStore<'_> {
    fn load_quiz(&self, quiz_id: &str) -> Result<Option<QuizContext>> {
        let row: Option<(String, f64, f64, i64, i64)> = self
            .conn
            .query_row(
                "SELECT id, grade, sumgrades, grade_method, attempts FROM quizzes WHERE id = ?",
                [quiz_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .optional()?;
        let Some((id, max_grade, sum_grades, method_code, allowed_attempts)) = row else {
            return Ok(None);
        };
        Ok(Some(QuizContext {
            id,
            max_grade,
            sum_grades,
            grade_method: GradeMethod::from_code(method_code)?,
            allowed_attempts,
        }))
    }

    fn set_sum_grades(&self, quiz_id: &str, sum_grades: f64) -> Result<()> {
        let n = self.conn.execute(
            "UPDATE quizzes SET sumgrades = ? WHERE id = ?",
            (sum_grades, quiz_id),
        )?;
        if n == 0 {
            return Err(GradingError::QuizNotFound(quiz_id.to_string()));
        }
        Ok(())
    }

    fn set_max_grade(&self, quiz_id: &str, max_grade: f64) -> Result<()> {
        let n = self.conn.execute(
            "UPDATE quizzes SET grade = ? WHERE id = ?",
            (max_grade, quiz_id),
        )?;
        if n == 0 {
            return Err(GradingError::QuizNotFound(quiz_id.to_string()));
        }
        Ok(())
    }
}

impl QuestionStructure for SqliteStore<'_> {
    fn slot_max_marks(&self, quiz_id: &str) -> Result<Vec<SlotMark>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, max_mark FROM quiz_slots WHERE quiz_id = ? ORDER BY slot")?;
        let slots = stmt
            .query_map([quiz_id], |r| {
                Ok(SlotMark {
                    slot_id: r.get(0)?,
                    max_mark: r.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(slots)
    }
}

impl AttemptStore for SqliteStore<'_> {
    fn has_finished_attempts(&self, quiz_id: &str) -> Result<bool> {
        // Deliberately wider than ELIGIBLE_ATTEMPTS: a finished attempt with no
        // sumgrades still counts here.
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
               SELECT 1 FROM quiz_attempts
               WHERE quiz_id = ? AND state = 'finished' AND preview = 0
             )",
            [quiz_id],
            |r| r.get(0),
        )?;
        Ok(exists != 0)
    }

    fn user_attempts(&self, quiz_id: &str, user_id: &str) -> Result<Vec<AttemptSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT attempt, state, sumgrades, preview
             FROM quiz_attempts
             WHERE quiz_id = ? AND user_id = ? AND preview = 0
             ORDER BY attempt",
        )?;
        let rows = stmt
            .query_map((quiz_id, user_id), |r| {
                let attempt: i64 = r.get(0)?;
                let state: String = r.get(1)?;
                let sumgrades: Option<f64> = r.get(2)?;
                let preview: i64 = r.get(3)?;
                Ok((attempt, state, sumgrades, preview))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(attempt_number, state, raw_score, preview)| -> Result<AttemptSummary> {
                Ok(AttemptSummary {
                    attempt_number,
                    state: AttemptState::parse(&state)?,
                    raw_score,
                    preview: preview != 0,
                })
            })
            .collect()
    }

    fn aggregate_raw_grades(
        &self,
        quiz_id: &str,
        method: GradeMethod,
    ) -> Result<HashMap<String, f64>> {
        let sql = match method {
            GradeMethod::Average => format!(
                "SELECT user_id, AVG(sumgrades) FROM quiz_attempts WHERE {} GROUP BY user_id",
                ELIGIBLE_ATTEMPTS
            ),
            GradeMethod::Highest => format!(
                "SELECT user_id, MAX(sumgrades) FROM quiz_attempts WHERE {} GROUP BY user_id",
                ELIGIBLE_ATTEMPTS
            ),
            GradeMethod::First | GradeMethod::Last => {
                let pick = if method == GradeMethod::First {
                    "MIN"
                } else {
                    "MAX"
                };
                // Pick the qualifying attempt number per learner first, then
                // join back for that attempt's score.
                format!(
                    "SELECT qa.user_id, qa.sumgrades
                     FROM quiz_attempts qa
                     JOIN (
                       SELECT user_id, {}(attempt) AS attempt
                       FROM quiz_attempts
                       WHERE {}
                       GROUP BY user_id
                     ) pick ON pick.user_id = qa.user_id AND pick.attempt = qa.attempt
                     WHERE qa.quiz_id = ?1",
                    pick, ELIGIBLE_ATTEMPTS
                )
            }
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([quiz_id], |r| {
                let user_id: String = r.get(0)?;
                let raw: f64 = r.get(1)?;
                Ok((user_id, raw))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(rows)
    }
}

impl GradeStore for SqliteStore<'_> {
    fn user_grade(&self, quiz_id: &str, user_id: &str) -> Result<Option<GradeRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT user_id, grade, time_modified
                 FROM quiz_grades
                 WHERE quiz_id = ? AND user_id = ?",
                (quiz_id, user_id),
                |r| {
                    Ok(GradeRecord {
                        user_id: r.get(0)?,
                        grade: r.get(1)?,
                        last_modified: r.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn quiz_grades(&self, quiz_id: &str) -> Result<Vec<GradeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, grade, time_modified
             FROM quiz_grades
             WHERE quiz_id = ?
             ORDER BY user_id",
        )?;
        let rows = stmt
            .query_map([quiz_id], |r| {
                Ok(GradeRecord {
                    user_id: r.get(0)?,
                    grade: r.get(1)?,
                    last_modified: r.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn upsert_grades(
        &self,
        quiz_id: &str,
        grades: &[(String, f64)],
        modified: i64,
    ) -> Result<()> {
        for chunk in grades.chunks(self.chunk_size) {
            let sql = format!(
                "INSERT INTO quiz_grades(id, quiz_id, user_id, grade, time_modified)
                 VALUES {}
                 ON CONFLICT(quiz_id, user_id) DO UPDATE SET
                   grade = excluded.grade,
                   time_modified = excluded.time_modified",
                placeholders("(?, ?, ?, ?, ?)", chunk.len())
            );
            let mut bind_values: Vec<Value> = Vec::with_capacity(chunk.len() * 5);
            for (user_id, grade) in chunk {
                bind_values.push(Value::Text(Uuid::new_v4().to_string()));
                bind_values.push(Value::Text(quiz_id.to_string()));
                bind_values.push(Value::Text(user_id.clone()));
                bind_values.push(Value::Real(*grade));
                bind_values.push(Value::Integer(modified));
            }
            self.conn.execute(&sql, params_from_iter(bind_values))?;
        }
        Ok(())
    }

    fn delete_grades(&self, quiz_id: &str, user_ids: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for chunk in user_ids.chunks(self.chunk_size) {
            let sql = format!(
                "DELETE FROM quiz_grades WHERE quiz_id = ? AND user_id IN ({})",
                placeholders("?", chunk.len())
            );
            let mut bind_values: Vec<Value> = Vec::with_capacity(chunk.len() + 1);
            bind_values.push(Value::Text(quiz_id.to_string()));
            for id in chunk {
                bind_values.push(Value::Text(id.clone()));
            }
            deleted += self.conn.execute(&sql, params_from_iter(bind_values))?;
        }
        Ok(deleted)
    }

    fn scale_grades(&self, quiz_id: &str, factor: f64, modified: i64) -> Result<usize> {
        let n = self.conn.execute(
            "UPDATE quiz_grades SET grade = grade * ?, time_modified = ? WHERE quiz_id = ?",
            (factor, modified, quiz_id),
        )?;
        Ok(n)
    }
}

impl FeedbackBandStore for SqliteStore<'_> {
    fn feedback_bands(&self, quiz_id: &str) -> Result<Vec<FeedbackBand>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, feedback_text, min_grade, max_grade
             FROM quiz_feedback
             WHERE quiz_id = ?
             ORDER BY min_grade",
        )?;
        let bands = stmt
            .query_map([quiz_id], |r| {
                Ok(FeedbackBand {
                    id: r.get(0)?,
                    feedback_text: r.get(1)?,
                    min_grade: r.get(2)?,
                    max_grade: r.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(bands)
    }

    fn scale_feedback_bands(&self, quiz_id: &str, factor: f64) -> Result<usize> {
        let n = self.conn.execute(
            "UPDATE quiz_feedback
             SET min_grade = min_grade * ?1, max_grade = max_grade * ?1
             WHERE quiz_id = ?2",
            (factor, quiz_id),
        )?;
        Ok(n)
    }
}

impl GradebookSync for SqliteStore<'_> {
    fn push_grades(&self, quiz_id: &str, entries: &[GradebookEntry]) -> Result<()> {
        let updated_at = now_ts();
        for chunk in entries.chunks(self.chunk_size) {
            let sql = format!(
                "INSERT INTO gradebook_grades(quiz_id, user_id, grade, updated_at)
                 VALUES {}
                 ON CONFLICT(quiz_id, user_id) DO UPDATE SET
                   grade = excluded.grade,
                   updated_at = excluded.updated_at",
                placeholders("(?, ?, ?, ?)", chunk.len())
            );
            let mut bind_values: Vec<Value> = Vec::with_capacity(chunk.len() * 4);
            for entry in chunk {
                bind_values.push(Value::Text(quiz_id.to_string()));
                bind_values.push(Value::Text(entry.user_id.clone()));
                bind_values.push(entry.grade.map(Value::Real).unwrap_or(Value::Null));
                bind_values.push(Value::Integer(updated_at));
            }
            self.conn.execute(&sql, params_from_iter(bind_values))?;
        }
        Ok(())
    }
}

impl EventPublisher for SqliteStore<'_> {
    fn publish(&self, event: &GradeUpdatedEvent) -> Result<()> {
        self.conn.execute(
            "INSERT INTO grade_events(quiz_id, event_name, old_grade, new_grade, created_at)
             VALUES(?, ?, ?, ?, ?)",
            (
                &event.quiz_id,
                GRADE_UPDATED_EVENT,
                event.old_grade,
                event.new_grade,
                now_ts(),
            ),
        )?;
        Ok(())
    }
}

impl UnitOfWork for SqliteStore<'_> {
    fn run(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        // Dropping an uncommitted transaction rolls it back.
        let tx = self.conn.unchecked_transaction()?;
        work()?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{insert_attempt, insert_grade, insert_quiz, memory_db};

    #[test]
    fn grouped_aggregation_matches_each_method() {
        let conn = memory_db();
        insert_quiz(&conn, "q1", 100.0, 10.0, GradeMethod::Highest);
        insert_attempt(&conn, "q1", "u1", 1, "finished", Some(6.0), false);
        insert_attempt(&conn, "q1", "u1", 2, "finished", Some(9.0), false);
        insert_attempt(&conn, "q1", "u1", 3, "finished", Some(3.0), false);
        insert_attempt(&conn, "q1", "u1", 4, "inprogress", None, false);
        insert_attempt(&conn, "q1", "u2", 1, "abandoned", Some(10.0), false);
        insert_attempt(&conn, "q1", "u3", 1, "finished", Some(10.0), true);
        let store = SqliteStore::new(&conn);

        let first = store.aggregate_raw_grades("q1", GradeMethod::First).expect("first");
        let last = store.aggregate_raw_grades("q1", GradeMethod::Last).expect("last");
        let highest = store
            .aggregate_raw_grades("q1", GradeMethod::Highest)
            .expect("highest");
        let average = store
            .aggregate_raw_grades("q1", GradeMethod::Average)
            .expect("average");

        for map in [&first, &last, &highest, &average] {
            assert_eq!(map.len(), 1, "only u1 has eligible attempts: {:?}", map);
        }
        assert_eq!(first.get("u1").copied(), Some(6.0));
        assert_eq!(last.get("u1").copied(), Some(3.0));
        assert_eq!(highest.get("u1").copied(), Some(9.0));
        assert!((average["u1"] - 6.0).abs() < 1e-9);
    }

    #[test]
    fn user_attempts_exclude_previews_and_keep_order() {
        let conn = memory_db();
        insert_quiz(&conn, "q1", 10.0, 10.0, GradeMethod::Last);
        insert_attempt(&conn, "q1", "u1", 2, "finished", Some(4.0), false);
        insert_attempt(&conn, "q1", "u1", 1, "abandoned", None, false);
        insert_attempt(&conn, "q1", "u1", 3, "finished", Some(7.0), true);
        let store = SqliteStore::new(&conn);

        let attempts = store.user_attempts("q1", "u1").expect("attempts");
        let numbers: Vec<i64> = attempts.iter().map(|a| a.attempt_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(attempts[0].state, AttemptState::Abandoned);
    }

    #[test]
    fn bulk_writes_span_multiple_chunks() {
        let conn = memory_db();
        insert_quiz(&conn, "q1", 10.0, 10.0, GradeMethod::Highest);
        let store = SqliteStore::new(&conn).with_chunk_size(2);

        let grades: Vec<(String, f64)> = (0..5).map(|i| (format!("u{}", i), i as f64)).collect();
        store.upsert_grades("q1", &grades, 100).expect("insert");
        assert_eq!(store.quiz_grades("q1").expect("grades").len(), 5);

        store
            .upsert_grades("q1", &[("u3".to_string(), 9.5)], 200)
            .expect("update");
        let u3 = store.user_grade("q1", "u3").expect("u3").expect("record");
        assert_eq!(u3.grade, 9.5);
        assert_eq!(u3.last_modified, 200);

        let gone: Vec<String> = vec!["u0".into(), "u1".into(), "u4".into(), "nobody".into()];
        assert_eq!(store.delete_grades("q1", &gone).expect("delete"), 3);
        assert_eq!(store.quiz_grades("q1").expect("grades").len(), 2);
    }

    #[test]
    fn failed_unit_of_work_rolls_back() {
        let conn = memory_db();
        insert_quiz(&conn, "q1", 10.0, 10.0, GradeMethod::Highest);
        insert_grade(&conn, "q1", "u1", 8.0);
        let store = SqliteStore::new(&conn);

        let res = store.run(&mut || -> Result<()> {
            store.set_max_grade("q1", 5.0)?;
            store.scale_grades("q1", 0.5, 1)?;
            Err(GradingError::Collaborator {
                collaborator: "test",
                message: "boom".into(),
            })
        });
        assert!(res.is_err());

        let quiz = store.load_quiz("q1").expect("load").expect("quiz");
        assert_eq!(quiz.max_grade, 10.0);
        let g = store.user_grade("q1", "u1").expect("grade").expect("record");
        assert_eq!(g.grade, 8.0);
    }

    #[test]
    fn attempt_rows_with_unknown_state_are_rejected() {
        let conn = memory_db();
        insert_quiz(&conn, "q1", 10.0, 10.0, GradeMethod::Highest);
        insert_attempt(&conn, "q1", "u1", 1, "finished", Some(8.0), false);
        let rejected = conn.execute(
            "INSERT INTO quiz_attempts(id, quiz_id, user_id, attempt, state, sumgrades, preview)
             VALUES('a2', 'q1', 'u1', 2, 'submitted', NULL, 0)",
            [],
        );
        assert!(rejected.is_err());

        // Batch and single-learner reads stay in agreement.
        let store = SqliteStore::new(&conn);
        let batch = store
            .aggregate_raw_grades("q1", GradeMethod::Highest)
            .expect("batch");
        let attempts = store.user_attempts("q1", "u1").expect("attempts");
        assert_eq!(batch.get("u1").copied(), Some(8.0));
        assert_eq!(attempts.len(), 1);
    }

    #[test]
    fn unknown_grade_method_code_is_reported() {
        let conn = memory_db();
        conn.execute(
            "INSERT INTO quizzes(id, name, grade, sumgrades, grade_method) VALUES('q9', 'Q', 10, 10, 7)",
            [],
        )
        .expect("insert quiz");
        let store = SqliteStore::new(&conn);
        assert!(matches!(
            store.load_quiz("q9"),
            Err(GradingError::UnknownGradeMethod(7))
        ));
    }
}
