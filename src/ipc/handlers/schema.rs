use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use crate::model::{ColumnKind, EntityKind};
use serde_json::json;

fn describe_entity(kind: EntityKind) -> serde_json::Value {
    let columns: Vec<_> = kind
        .columns()
        .iter()
        .map(|c| {
            let references = match c.kind {
                ColumnKind::Reference(target) => Some(target.table()),
                _ => None,
            };
            json!({
                "name": c.name,
                "kind": c.kind.name(),
                "required": c.required,
                "references": references,
            })
        })
        .collect();
    let statuses: Vec<_> = kind
        .statuses()
        .iter()
        .map(|(code, label)| json!({ "code": code, "label": label }))
        .collect();
    json!({
        "entity": kind.table(),
        "kind": kind,
        "label": kind.label(),
        "columns": columns,
        "statuses": statuses,
        "defaultStatus": kind.default_status(),
    })
}

// Static: does not need a workspace.
fn handle_schema_describe(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let entities: Vec<_> = match req.params.get("entity").and_then(|v| v.as_str()) {
        Some(name) => match EntityKind::from_table(name) {
            Some(kind) => vec![describe_entity(kind)],
            None => {
                return crate::ipc::error::err(
                    &req.id,
                    "bad_params",
                    format!("unknown entity: {}", name),
                    None,
                )
            }
        },
        None => EntityKind::ALL.into_iter().map(describe_entity).collect(),
    };
    ok(&req.id, json!({ "entities": entities }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schema.describe" => Some(handle_schema_describe(state, req)),
        _ => None,
    }
}
