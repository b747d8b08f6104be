use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use super::error::{err, no_workspace, ok};
use super::types::{AppState, Request};
use crate::engine::{Collaborators, GradingEngine};
use crate::error::GradingError;
use crate::settings;
use crate::store::sqlite::SqliteStore;
use crate::store::NullGradebook;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<GradingError> for HandlerErr {
    fn from(e: GradingError) -> Self {
        let code = e.code();
        if matches!(code, "db_query_failed" | "internal_error") {
            warn!(error = %e, code, "grading request failed");
        }
        let details = match &e {
            GradingError::QuizNotFound(quiz_id) => Some(serde_json::json!({ "quizId": quiz_id })),
            _ => None,
        };
        Self {
            code,
            message: e.to_string(),
            details,
        }
    }
}

pub fn get_required_str<'p>(params: &'p Value, key: &str) -> Result<&'p str, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_required_f64(params: &Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key)))
}

pub fn to_json<T: Serialize>(value: &T) -> Result<Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr {
        code: "internal_error",
        message: e.to_string(),
        details: None,
    })
}

fn respond(id: &str, result: Result<Value, HandlerErr>) -> Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

pub type HandlerFn = fn(&Connection, &Value) -> Result<Value, HandlerErr>;

/// Runs a handler against the selected workspace and wraps its outcome in
/// the response envelope.
pub fn dispatch(state: &mut AppState, req: &Request, handler: HandlerFn) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    respond(&req.id, handler(conn, &req.params))
}

/// Runs `work` against an engine wired to the workspace database, honouring
/// the saved grading settings.
pub fn with_engine<T>(
    conn: &Connection,
    work: impl FnOnce(&GradingEngine<'_>) -> crate::error::Result<T>,
) -> Result<T, HandlerErr> {
    let grading = settings::load(conn).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })?;
    let store = SqliteStore::new(conn).with_chunk_size(grading.bulk_chunk_size);
    let detached = NullGradebook;
    let mut stores = Collaborators::sqlite(&store);
    if !grading.gradebook_sync {
        stores = stores.with_gradebook(&detached);
    }
    let engine = GradingEngine::new(stores);
    work(&engine).map_err(HandlerErr::from)
}
