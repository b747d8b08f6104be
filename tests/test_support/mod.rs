#![allow(dead_code)]

use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_quizgraded");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn quizgraded");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().expect("result")
}

pub fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

/// Opens the workspace database directly, creating the schema if needed.
pub fn open_workspace_db(workspace: &Path) -> Connection {
    quizgraded::db::open_db(workspace).expect("open workspace db")
}

pub fn seed_quiz(conn: &Connection, quiz_id: &str, max_grade: f64, sum_grades: f64, method: i64) {
    conn.execute(
        "INSERT INTO quizzes(id, name, grade, sumgrades, grade_method) VALUES(?, ?, ?, ?, ?)",
        (quiz_id, format!("Quiz {}", quiz_id), max_grade, sum_grades, method),
    )
    .expect("insert quiz");
}

pub fn seed_slot(conn: &Connection, quiz_id: &str, slot: i64, max_mark: f64) {
    conn.execute(
        "INSERT INTO quiz_slots(id, quiz_id, slot, max_mark) VALUES(?, ?, ?, ?)",
        (format!("{}-s{}", quiz_id, slot), quiz_id, slot, max_mark),
    )
    .expect("insert slot");
}

pub fn seed_attempt(
    conn: &Connection,
    quiz_id: &str,
    user_id: &str,
    attempt: i64,
    state: &str,
    sumgrades: Option<f64>,
) {
    conn.execute(
        "INSERT INTO quiz_attempts(id, quiz_id, user_id, attempt, state, sumgrades, preview)
         VALUES(?, ?, ?, ?, ?, ?, 0)",
        (
            format!("{}-{}-{}", quiz_id, user_id, attempt),
            quiz_id,
            user_id,
            attempt,
            state,
            sumgrades,
        ),
    )
    .expect("insert attempt");
}

pub fn seed_grade(conn: &Connection, quiz_id: &str, user_id: &str, grade: f64) {
    conn.execute(
        "INSERT INTO quiz_grades(id, quiz_id, user_id, grade, time_modified) VALUES(?, ?, ?, ?, 0)",
        (format!("{}-{}", quiz_id, user_id), quiz_id, user_id, grade),
    )
    .expect("insert grade");
}

pub fn seed_feedback(conn: &Connection, quiz_id: &str, id: &str, text: &str, min: f64, max: f64) {
    conn.execute(
        "INSERT INTO quiz_feedback(id, quiz_id, feedback_text, min_grade, max_grade)
         VALUES(?, ?, ?, ?, ?)",
        (id, quiz_id, text, min, max),
    )
    .expect("insert feedback");
}

pub fn grade_of(result: &serde_json::Value, user_id: &str) -> Option<f64> {
    result
        .get("grades")
        .and_then(|v| v.as_array())
        .and_then(|rows| {
            rows.iter()
                .find(|r| r.get("userId").and_then(|v| v.as_str()) == Some(user_id))
        })
        .and_then(|r| r.get("grade"))
        .and_then(|v| v.as_f64())
}
