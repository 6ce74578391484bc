use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

// Order matters: relation methods share prefixes with the per-entity aliases.
const FAMILIES: &[TryHandle] = &[
    handlers::core::try_handle,
    handlers::settings::try_handle,
    handlers::schema::try_handle,
    handlers::relations::try_handle,
    handlers::records::try_handle,
    handlers::table::try_handle,
    handlers::command::try_handle,
    handlers::backup::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    tracing::debug!(id = %req.id, method = %req.method, "request");
    for try_handle in FAMILIES {
        if let Some(resp) = try_handle(state, &req) {
            if resp.get("ok").and_then(|v| v.as_bool()) == Some(false) {
                tracing::warn!(
                    id = %req.id,
                    method = %req.method,
                    code = resp["error"]["code"].as_str().unwrap_or(""),
                    message = resp["error"]["message"].as_str().unwrap_or(""),
                    "request failed"
                );
            }
            return resp;
        }
    }

    tracing::warn!(method = %req.method, "unknown method");
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
