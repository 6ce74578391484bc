use crate::config::{HISTORY_LIMIT_KEY, PAGE_SIZE_KEY};
use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_required_str, require_db};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const KNOWN_KEYS: &[&str] = &[PAGE_SIZE_KEY, HISTORY_LIMIT_KEY];

fn settings_get(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let db_err = |e: anyhow::Error| HandlerErr::new("db_query_failed", e.to_string());
    let mut stored = serde_json::Map::new();
    for key in KNOWN_KEYS {
        if let Some(v) = db::settings_get_json(conn, key).map_err(db_err)? {
            stored.insert(key.to_string(), v);
        }
    }
    if let Some(key) = params.get("key").and_then(|v| v.as_str()) {
        return Ok(json!({
            "key": key,
            "value": stored.get(key).cloned().unwrap_or(serde_json::Value::Null),
        }));
    }
    Ok(json!({
        "settings": stored,
        "effective": {
            "pageSize": state.config.page_size(Some(conn)),
            "historyLimit": state.config.history_limit(Some(conn)),
        }
    }))
}

fn settings_set(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let key = get_required_str(params, "key")?;
    if !KNOWN_KEYS.contains(&key.as_str()) {
        return Err(HandlerErr::bad_params(format!("unknown setting: {}", key)));
    }
    let value = params
        .get("value")
        .and_then(|v| v.as_u64())
        .filter(|n| *n > 0 && i64::try_from(*n).is_ok())
        .ok_or_else(|| HandlerErr::bad_params("value must be a positive integer"))?;
    db::settings_set_json(conn, &key, &json!(value))
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({ "key": key, "value": value }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(respond(&req.id, settings_get(state, &req.params))),
        "settings.set" => Some(respond(&req.id, settings_set(state, &req.params))),
        _ => None,
    }
}
