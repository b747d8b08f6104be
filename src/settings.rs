use rusqlite::Connection;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::db;

pub const GRADING_SETTINGS_KEY: &str = "setup.grading";

#[derive(Debug, Clone, PartialEq)]
pub struct GradingSettings {
    pub bulk_chunk_size: usize,
    pub gradebook_sync: bool,
}

impl Default for GradingSettings {
    fn default() -> Self {
        Self {
            bulk_chunk_size: crate::store::sqlite::DEFAULT_CHUNK_SIZE,
            gradebook_sync: true,
        }
    }
}

pub fn default_section() -> Value {
    let d = GradingSettings::default();
    json!({
        "bulkChunkSize": d.bulk_chunk_size,
        "gradebookSync": d.gradebook_sync
    })
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

pub fn merge_patch(current: &mut Value, patch: &Map<String, Value>) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match k.as_str() {
            "bulkChunkSize" => {
                obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 2000)?));
            }
            "gradebookSync" => {
                obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
            }
            _ => return Err(format!("unknown grading field: {}", k)),
        }
    }
    Ok(())
}

/// Saved section merged over the defaults.
pub fn load_section(conn: &Connection) -> anyhow::Result<Value> {
    let mut current = default_section();
    if let Some(saved) = db::settings_get_json(conn, GRADING_SETTINGS_KEY)? {
        if let Some(saved_obj) = saved.as_object() {
            // A malformed saved section must not stop the workspace from loading.
            if let Err(e) = merge_patch(&mut current, saved_obj) {
                warn!(error = %e, "ignoring invalid saved grading settings");
            }
        }
    }
    Ok(current)
}

pub fn save_section(conn: &Connection, section: &Value) -> anyhow::Result<()> {
    db::settings_set_json(conn, GRADING_SETTINGS_KEY, section)
}

pub fn load(conn: &Connection) -> anyhow::Result<GradingSettings> {
    let section = load_section(conn)?;
    let d = GradingSettings::default();
    Ok(GradingSettings {
        bulk_chunk_size: section
            .get("bulkChunkSize")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(d.bulk_chunk_size),
        gradebook_sync: section
            .get("gradebookSync")
            .and_then(|v| v.as_bool())
            .unwrap_or(d.gradebook_sync),
    })
}
