use rusqlite::Connection;
use serde_json::json;

use crate::calc::AttemptSummary;
use crate::error::GradingError;
use crate::ipc::helpers::{dispatch, get_required_str, to_json, with_engine, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::sqlite::SqliteStore;
use crate::store::{GradeStore, QuizStore};

/// `params.attempts`, when present, replaces the stored attempt list.
fn parse_attempts(params: &serde_json::Value) -> Result<Option<Vec<AttemptSummary>>, HandlerErr> {
    match params.get("attempts") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => serde_json::from_value::<Vec<AttemptSummary>>(v.clone())
            .map(Some)
            .map_err(|e| HandlerErr::bad_params(format!("invalid attempts: {}", e))),
    }
}

fn require_quiz(store: &SqliteStore<'_>, quiz_id: &str) -> Result<(), HandlerErr> {
    if store.load_quiz(quiz_id)?.is_none() {
        return Err(GradingError::QuizNotFound(quiz_id.to_string()).into());
    }
    Ok(())
}

fn grades_update_user(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let quiz_id = get_required_str(params, "quizId")?;
    let user_id = get_required_str(params, "userId")?;
    let attempts = parse_attempts(params)?;
    let outcome = with_engine(conn, |engine| {
        engine.update_final_grade(quiz_id, user_id, attempts.as_deref())
    })?;
    to_json(&outcome)
}

fn grades_recompute_all(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let quiz_id = get_required_str(params, "quizId")?;
    let summary = with_engine(conn, |engine| engine.recompute_all_final_grades(quiz_id))?;
    to_json(&summary)
}

fn grades_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let quiz_id = get_required_str(params, "quizId")?;
    let user_id = get_required_str(params, "userId")?;
    let report = with_engine(conn, |engine| engine.user_grade_report(quiz_id, user_id))?;
    to_json(&report)
}

fn grades_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let quiz_id = get_required_str(params, "quizId")?;
    let store = SqliteStore::new(conn);
    require_quiz(&store, quiz_id)?;
    let grades = store.quiz_grades(quiz_id)?;
    let gradebook = store.gradebook_entries(quiz_id)?;
    Ok(json!({
        "grades": to_json(&grades)?,
        "gradebook": to_json(&gradebook)?
    }))
}

fn grades_sync_gradebook(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let quiz_id = get_required_str(params, "quizId")?;
    let pushed = with_engine(conn, |engine| {
        engine.quiz(quiz_id)?;
        engine.sync_gradebook(quiz_id)
    })?;
    Ok(json!({ "pushed": pushed }))
}

fn events_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let quiz_id = get_required_str(params, "quizId")?;
    let store = SqliteStore::new(conn);
    require_quiz(&store, quiz_id)?;
    let events = store.events(quiz_id)?;
    Ok(json!({ "events": to_json(&events)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.updateUser" => Some(dispatch(state, req, grades_update_user)),
        "grades.recomputeAll" => Some(dispatch(state, req, grades_recompute_all)),
        "grades.get" => Some(dispatch(state, req, grades_get)),
        "grades.list" => Some(dispatch(state, req, grades_list)),
        "grades.syncGradebook" => Some(dispatch(state, req, grades_sync_gradebook)),
        "events.list" => Some(dispatch(state, req, events_list)),
        _ => None,
    }
}
