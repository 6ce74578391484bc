use crate::ipc::error::HandlerErr;
use crate::ipc::types::AppState;
use crate::model::EntityKind;
use crate::service::Record;
use rusqlite::Connection;

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state.db.as_ref().ok_or_else(HandlerErr::no_workspace)
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// A JSON object param; absent means empty.
pub fn get_object(params: &serde_json::Value, key: &str) -> Result<Record, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(Record::new()),
        Some(serde_json::Value::Object(m)) => Ok(m.clone()),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be an object", key))),
    }
}

pub fn get_entity(params: &serde_json::Value) -> Result<EntityKind, HandlerErr> {
    let name = get_required_str(params, "entity")?;
    EntityKind::from_table(&name)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown entity: {}", name)))
}
