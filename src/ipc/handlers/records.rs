use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_entity, get_object, get_required_str, require_db};
use crate::ipc::types::{AppState, Request};
use crate::model::EntityKind;
use crate::service::{self, ListQuery};
use serde_json::json;

#[derive(Debug, Clone, Copy)]
enum Op {
    List,
    Get,
    Create,
    Update,
    Replace,
    Delete,
}

impl Op {
    fn parse(s: &str) -> Option<Op> {
        match s {
            "list" => Some(Op::List),
            "get" => Some(Op::Get),
            "create" => Some(Op::Create),
            "update" => Some(Op::Update),
            "replace" => Some(Op::Replace),
            "delete" => Some(Op::Delete),
            _ => None,
        }
    }
}

/// `records.<op>` takes `params.entity`; `<table>.<op>` names the entity in the method.
fn resolve(method: &str) -> Option<(Option<EntityKind>, Op)> {
    let (prefix, op) = method.split_once('.')?;
    let op = Op::parse(op)?;
    if prefix == "records" {
        return Some((None, op));
    }
    EntityKind::from_table(prefix).map(|k| (Some(k), op))
}

fn run(
    state: &AppState,
    kind: Option<EntityKind>,
    op: Op,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let kind = match kind {
        Some(k) => k,
        None => get_entity(params)?,
    };
    let conn = require_db(state)?;
    match op {
        Op::List => {
            let query: ListQuery = serde_json::from_value(params.clone())
                .map_err(|e| HandlerErr::bad_params(format!("invalid list query: {}", e)))?;
            let records = service::list(conn, kind, &query)?;
            Ok(json!({ "entity": kind.table(), "records": records }))
        }
        Op::Get => {
            let id = get_required_str(params, "id")?;
            let record = service::get(conn, kind, &id)?;
            Ok(json!({ "record": record }))
        }
        Op::Create => {
            let fields = get_object(params, "record")?;
            let record = service::create(conn, kind, &fields)?;
            Ok(json!({ "record": record }))
        }
        Op::Update => {
            let id = get_required_str(params, "id")?;
            let patch = get_object(params, "patch")?;
            let record = service::update(conn, kind, &id, &patch)?;
            Ok(json!({ "record": record }))
        }
        Op::Replace => {
            let id = get_required_str(params, "id")?;
            let full = get_object(params, "record")?;
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
            let record = service::replace(&tx, kind, &id, &full)?;
            tx.commit()
                .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
            Ok(json!({ "record": record }))
        }
        Op::Delete => {
            let id = get_required_str(params, "id")?;
            service::delete(conn, kind, &id)?;
            Ok(json!({ "deleted": true, "id": id }))
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let (kind, op) = resolve(&req.method)?;
    Some(respond(&req.id, run(state, kind, op, &req.params)))
}
