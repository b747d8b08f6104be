use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};

pub const DB_FILE_NAME: &str = "quizgrade.sqlite3";

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join(DB_FILE_NAME)
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(db_path(workspace))?;
    apply_schema(&conn)?;
    Ok(conn)
}

pub fn apply_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS workspace_settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quizzes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            grade REAL NOT NULL DEFAULT 10,
            sumgrades REAL NOT NULL DEFAULT 0,
            grade_method INTEGER NOT NULL DEFAULT 1,
            attempts INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quiz_slots(
            id TEXT PRIMARY KEY,
            quiz_id TEXT NOT NULL,
            slot INTEGER NOT NULL,
            max_mark REAL NOT NULL,
            FOREIGN KEY(quiz_id) REFERENCES quizzes(id),
            UNIQUE(quiz_id, slot)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quiz_slots_quiz ON quiz_slots(quiz_id)",
        [],
    )?;

    // Written by the attempt engine. Only finished, non-preview rows with a
    // sumgrades value take part in grading.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS quiz_attempts(
            id TEXT PRIMARY KEY,
            quiz_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            attempt INTEGER NOT NULL,
            state TEXT NOT NULL
                CHECK(state IN ('inprogress', 'overdue', 'finished', 'abandoned')),
            sumgrades REAL,
            preview INTEGER NOT NULL DEFAULT 0,
            time_finish INTEGER,
            FOREIGN KEY(quiz_id) REFERENCES quizzes(id),
            UNIQUE(quiz_id, user_id, attempt)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quiz_attempts_quiz_user ON quiz_attempts(quiz_id, user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quiz_attempts_quiz_state ON quiz_attempts(quiz_id, state, preview)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quiz_grades(
            id TEXT PRIMARY KEY,
            quiz_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            grade REAL NOT NULL,
            time_modified INTEGER NOT NULL,
            FOREIGN KEY(quiz_id) REFERENCES quizzes(id),
            UNIQUE(quiz_id, user_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quiz_grades_quiz ON quiz_grades(quiz_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quiz_feedback(
            id TEXT PRIMARY KEY,
            quiz_id TEXT NOT NULL,
            feedback_text TEXT NOT NULL,
            min_grade REAL NOT NULL,
            max_grade REAL NOT NULL,
            FOREIGN KEY(quiz_id) REFERENCES quizzes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quiz_feedback_quiz ON quiz_feedback(quiz_id)",
        [],
    )?;

    // Local mirror of what has been handed to the gradebook. NULL grade means
    // the learner's grade was cleared.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS gradebook_grades(
            quiz_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            grade REAL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY(quiz_id, user_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_events(
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            quiz_id TEXT NOT NULL,
            event_name TEXT NOT NULL,
            old_grade REAL NOT NULL,
            new_grade REAL NOT NULL,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_events_quiz ON grade_events(quiz_id)",
        [],
    )?;

    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM workspace_settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO workspace_settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}
