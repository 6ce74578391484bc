use crate::command::{self, Classification};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::require_db;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn command_submit(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let text = match params.get("text") {
        None | Some(serde_json::Value::Null) => "",
        Some(serde_json::Value::String(s)) => s.as_str(),
        Some(_) => return Err(HandlerErr::bad_params("text must be a string")),
    };
    let classification: Option<Classification> = match params.get("classification") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => Some(
            serde_json::from_value(v.clone())
                .map_err(|e| HandlerErr::bad_params(format!("invalid classification: {}", e)))?,
        ),
    };
    if text.trim().is_empty() {
        return serde_json::to_value(command::SubmitOutcome::skipped())
            .map_err(|e| HandlerErr::new("internal", e.to_string()));
    }
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let limit = state.config.history_limit(Some(conn));
    let outcome = command::submit(
        &mut state.commands,
        conn,
        text,
        classification.as_ref(),
        limit,
    )?;
    serde_json::to_value(outcome).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn command_history(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let entries = command::list_history(conn)?;
    Ok(json!({ "entries": entries }))
}

fn command_clear_history(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let removed = command::clear_history(conn)?;
    Ok(json!({ "removed": removed }))
}

fn command_outbox(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let emails = command::list_outbox(conn)?;
    Ok(json!({ "emails": emails }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "command.submit" => command_submit(state, &req.params),
        "command.history" => command_history(state),
        "command.clearHistory" => command_clear_history(state),
        "command.outbox" => command_outbox(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
