use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_object, require_db};
use crate::ipc::types::{AppState, Request};
use crate::model::EntityKind;
use crate::service::{self, ListQuery};
use crate::table::{self, TableRequest};

/// Rows come either inline (`params.data`) or from an entity list (`params.entity`).
fn table_query(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let req: TableRequest = serde_json::from_value(params.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid table request: {}", e)))?;

    let (data, kind) = match params.get("entity").and_then(|v| v.as_str()) {
        Some(name) => {
            let kind = EntityKind::from_table(name)
                .ok_or_else(|| HandlerErr::bad_params(format!("unknown entity: {}", name)))?;
            let conn = require_db(state)?;
            let query = ListQuery {
                eq: get_object(params, "eq")?,
                ..ListQuery::default()
            };
            let rows = service::list(conn, kind, &query)?
                .into_iter()
                .map(serde_json::Value::Object)
                .collect();
            (serde_json::Value::Array(rows), Some(kind))
        }
        None => (
            params.get("data").cloned().unwrap_or(serde_json::Value::Null),
            None,
        ),
    };

    let page_size = state.config.page_size(state.db.as_ref());
    let result = table::query(&data, &req, kind, page_size);
    serde_json::to_value(result).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "table.query" => Some(respond(&req.id, table_query(state, &req.params))),
        _ => None,
    }
}
