use rusqlite::Connection;
use std::cell::RefCell;
use uuid::Uuid;

use crate::calc::GradeMethod;
use crate::db;
use crate::error::{GradingError, Result};
use crate::store::{EventPublisher, GradeUpdatedEvent, GradebookEntry, GradebookSync};

pub fn memory_db() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    db::apply_schema(&conn).expect("apply schema");
    conn
}

pub fn insert_quiz(
    conn: &Connection,
    quiz_id: &str,
    max_grade: f64,
    sum_grades: f64,
    method: GradeMethod,
) {
    conn.execute(
        "INSERT INTO quizzes(id, name, grade, sumgrades, grade_method) VALUES(?, ?, ?, ?, ?)",
        (quiz_id, format!("Quiz {}", quiz_id), max_grade, sum_grades, method.code()),
    )
    .expect("insert quiz");
}

pub fn insert_slot(conn: &Connection, quiz_id: &str, slot: i64, max_mark: f64) {
    conn.execute(
        "INSERT INTO quiz_slots(id, quiz_id, slot, max_mark) VALUES(?, ?, ?, ?)",
        (Uuid::new_v4().to_string(), quiz_id, slot, max_mark),
    )
    .expect("insert slot");
}

pub fn insert_attempt(
    conn: &Connection,
    quiz_id: &str,
    user_id: &str,
    attempt: i64,
    state: &str,
    sumgrades: Option<f64>,
    preview: bool,
) {
    conn.execute(
        "INSERT INTO quiz_attempts(id, quiz_id, user_id, attempt, state, sumgrades, preview)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            quiz_id,
            user_id,
            attempt,
            state,
            sumgrades,
            preview as i64,
        ),
    )
    .expect("insert attempt");
}

pub fn insert_grade(conn: &Connection, quiz_id: &str, user_id: &str, grade: f64) {
    conn.execute(
        "INSERT INTO quiz_grades(id, quiz_id, user_id, grade, time_modified) VALUES(?, ?, ?, ?, 0)",
        (Uuid::new_v4().to_string(), quiz_id, user_id, grade),
    )
    .expect("insert grade");
}

pub fn insert_feedback(conn: &Connection, quiz_id: &str, text: &str, min: f64, max: f64) {
    conn.execute(
        "INSERT INTO quiz_feedback(id, quiz_id, feedback_text, min_grade, max_grade)
         VALUES(?, ?, ?, ?, ?)",
        (Uuid::new_v4().to_string(), quiz_id, text, min, max),
    )
    .expect("insert feedback");
}

/// Rows inserted, updated or deleted on this connection since it opened.
pub fn total_changes(conn: &Connection) -> i64 {
    conn.query_row("SELECT total_changes()", [], |r| r.get(0))
        .expect("total_changes")
}

#[derive(Default)]
pub struct RecordingGradebook {
    pub pushes: RefCell<Vec<GradebookEntry>>,
}

impl GradebookSync for RecordingGradebook {
    fn push_grades(&self, _quiz_id: &str, entries: &[GradebookEntry]) -> Result<()> {
        self.pushes.borrow_mut().extend_from_slice(entries);
        Ok(())
    }
}

pub struct FailingGradebook;

impl GradebookSync for FailingGradebook {
    fn push_grades(&self, _quiz_id: &str, _entries: &[GradebookEntry]) -> Result<()> {
        Err(GradingError::Collaborator {
            collaborator: "gradebook",
            message: "gradebook unavailable".into(),
        })
    }
}

#[derive(Default)]
pub struct RecordingEvents {
    pub events: RefCell<Vec<GradeUpdatedEvent>>,
}

impl EventPublisher for RecordingEvents {
    fn publish(&self, event: &GradeUpdatedEvent) -> Result<()> {
        self.events.borrow_mut().push(event.clone());
        Ok(())
    }
}
