use rusqlite::Connection;
use serde_json::json;

use crate::error::GradingError;
use crate::ipc::helpers::{
    dispatch, get_required_f64, get_required_str, to_json, with_engine, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store::sqlite::SqliteStore;
use crate::store::{FeedbackBandStore, QuestionStructure, QuizStore};

fn quiz_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let quiz_id = get_required_str(params, "quizId")?;
    let store = SqliteStore::new(conn);
    let quiz = store
        .load_quiz(quiz_id)?
        .ok_or_else(|| GradingError::QuizNotFound(quiz_id.to_string()))?;
    let slots = store.slot_max_marks(quiz_id)?;
    let bands = store.feedback_bands(quiz_id)?;
    Ok(json!({
        "quiz": to_json(&quiz)?,
        "slots": to_json(&slots)?,
        "feedbackBands": to_json(&bands)?
    }))
}

fn quiz_recompute_sum_grades(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let quiz_id = get_required_str(params, "quizId")?;
    let outcome = with_engine(conn, |engine| engine.recompute_sum_grades(quiz_id))?;
    to_json(&outcome)
}

fn quiz_set_max_grade(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let quiz_id = get_required_str(params, "quizId")?;
    let max_grade = get_required_f64(params, "maxGrade")?;
    let change = with_engine(conn, |engine| engine.set_maximum_grade(quiz_id, max_grade))?;
    to_json(&change)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "quiz.get" => Some(dispatch(state, req, quiz_get)),
        "quiz.recomputeSumGrades" => Some(dispatch(state, req, quiz_recompute_sum_grades)),
        "quiz.setMaxGrade" => Some(dispatch(state, req, quiz_set_max_grade)),
        _ => None,
    }
}
