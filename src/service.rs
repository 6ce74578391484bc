//! Generic CRUD surface over the entity tables.
//!
//! Every entity kind goes through the same functions; column names are only
//! ever interpolated into SQL after being checked against the kind's column
//! list, values are always bound.

use crate::model::{ColumnKind, EntityKind};
use chrono::{SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

pub type Record = serde_json::Map<String, serde_json::Value>;

/// Keys clients may echo back from a fetched record; ignored on write.
const READ_ONLY_KEYS: &[&str] = &["created_at", "updated_at", "trang_thai_label"];
const META_COLUMNS: &[&str] = &["id", "created_at", "updated_at"];

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[source] rusqlite::Error),
}

impl From<rusqlite::Error> for ServiceError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref f, ref msg) = e {
            if f.code == ErrorCode::ConstraintViolation {
                return ServiceError::Conflict(
                    msg.clone()
                        .unwrap_or_else(|| "constraint violation".to_string()),
                );
            }
        }
        ServiceError::Database(e)
    }
}

impl ServiceError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    fn not_found(kind: EntityKind, id: &str) -> Self {
        ServiceError::NotFound {
            entity: kind.table(),
            id: id.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation { .. } => "bad_params",
            ServiceError::NotFound { .. } => "not_found",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::Database(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            ServiceError::Validation { field, .. } => Some(json!({ "field": field })),
            ServiceError::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            _ => None,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
}

fn default_ascending() -> bool {
    true
}

/// The `select ... eq ... order ... limit` shape of a list call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub eq: Record,
    #[serde(default)]
    pub order: Option<OrderBy>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn column_kind(kind: EntityKind, name: &str) -> ServiceResult<ColumnKind> {
    if META_COLUMNS.contains(&name) {
        return Ok(ColumnKind::Text);
    }
    kind.column(name)
        .map(|c| c.kind)
        .ok_or_else(|| ServiceError::validation(name, format!("unknown column for {}", kind.table())))
}

fn select_list(kind: EntityKind, alias: &str) -> String {
    let mut cols = vec![format!("{alias}.id")];
    cols.extend(kind.columns().iter().map(|c| format!("{alias}.{}", c.name)));
    cols.push(format!("{alias}.created_at"));
    cols.push(format!("{alias}.updated_at"));
    cols.join(", ")
}

fn sql_to_json(v: Value) -> serde_json::Value {
    match v {
        Value::Null | Value::Blob(_) => serde_json::Value::Null,
        Value::Integer(n) => json!(n),
        Value::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::String(s),
    }
}

fn row_to_record(kind: EntityKind, row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let mut rec = Record::new();
    rec.insert("id".into(), sql_to_json(row.get::<_, Value>(0)?));
    for (i, col) in kind.columns().iter().enumerate() {
        rec.insert(col.name.into(), sql_to_json(row.get::<_, Value>(i + 1)?));
    }
    let n = kind.columns().len();
    rec.insert("created_at".into(), sql_to_json(row.get::<_, Value>(n + 1)?));
    rec.insert("updated_at".into(), sql_to_json(row.get::<_, Value>(n + 2)?));
    if kind.has_status() {
        let label = rec
            .get("trang_thai")
            .and_then(|v| v.as_str())
            .map(|code| kind.status_label(code).unwrap_or(code).to_string());
        rec.insert("trang_thai_label".into(), json!(label));
    }
    Ok(rec)
}

fn query_records(
    conn: &Connection,
    kind: EntityKind,
    sql: &str,
    params: &[Value],
) -> ServiceResult<Vec<Record>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |r| row_to_record(kind, r))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list(conn: &Connection, kind: EntityKind, query: &ListQuery) -> ServiceResult<Vec<Record>> {
    let mut sql = format!("SELECT {} FROM {} t", select_list(kind, "t"), kind.table());
    let mut params = Vec::new();
    let mut clauses = Vec::new();
    for (col, v) in query.eq.iter() {
        let ck = column_kind(kind, col)?;
        let value = ck
            .coerce(v)
            .map_err(|m| ServiceError::validation(col.as_str(), m))?;
        if value == Value::Null {
            clauses.push(format!("t.{col} IS NULL"));
        } else {
            clauses.push(format!("t.{col} = ?"));
            params.push(value);
        }
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    match &query.order {
        Some(order) => {
            column_kind(kind, &order.column)?;
            let dir = if order.ascending { "ASC" } else { "DESC" };
            sql.push_str(&format!(" ORDER BY t.{} {dir}, t.rowid {dir}", order.column));
        }
        None => sql.push_str(" ORDER BY t.created_at ASC, t.rowid ASC"),
    }
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    query_records(conn, kind, &sql, &params)
}

pub fn get(conn: &Connection, kind: EntityKind, id: &str) -> ServiceResult<Record> {
    let sql = format!(
        "SELECT {} FROM {} t WHERE t.id = ?",
        select_list(kind, "t"),
        kind.table()
    );
    conn.query_row(&sql, [id], |r| row_to_record(kind, r))
        .optional()?
        .ok_or_else(|| ServiceError::not_found(kind, id))
}

fn exists(conn: &Connection, kind: EntityKind, id: &str) -> ServiceResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            &format!("SELECT 1 FROM {} WHERE id = ?", kind.table()),
            [id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn check_status(kind: EntityKind, value: &Value) -> ServiceResult<()> {
    if let Value::Text(code) = value {
        if kind.status_label(code).is_none() {
            let allowed: Vec<&str> = kind.statuses().iter().map(|(c, _)| *c).collect();
            return Err(ServiceError::validation(
                "trang_thai",
                format!("unknown status '{}' (allowed: {})", code, allowed.join(", ")),
            ));
        }
    }
    Ok(())
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Text(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Coerces one writable field. Returns `None` for keys that are silently ignored.
fn coerce_field(
    kind: EntityKind,
    key: &str,
    raw: &serde_json::Value,
) -> ServiceResult<Option<(&'static str, Value)>> {
    if READ_ONLY_KEYS.contains(&key) || key == "id" {
        return Ok(None);
    }
    let Some(col) = kind.column(key) else {
        return Err(ServiceError::validation(
            key,
            format!("unknown column for {}", kind.table()),
        ));
    };
    let value = col
        .kind
        .coerce(raw)
        .map_err(|m| ServiceError::validation(key, m))?;
    if col.required && is_blank(&value) {
        return Err(ServiceError::validation(key, "is required"));
    }
    if col.name == "trang_thai" {
        check_status(kind, &value)?;
    }
    Ok(Some((col.name, value)))
}

pub fn create(conn: &Connection, kind: EntityKind, fields: &Record) -> ServiceResult<Record> {
    let id = match fields.get("id") {
        None | Some(serde_json::Value::Null) => Uuid::new_v4().to_string(),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Uuid::new_v4().to_string(),
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(_) => return Err(ServiceError::validation("id", "must be a string")),
    };

    let mut values: Vec<(&'static str, Value)> = Vec::new();
    for (key, raw) in fields.iter() {
        if let Some(pair) = coerce_field(kind, key, raw)? {
            values.push(pair);
        }
    }
    for col in kind.columns().iter().filter(|c| c.required) {
        if !values.iter().any(|(name, _)| *name == col.name) {
            return Err(ServiceError::validation(col.name, "is required"));
        }
    }
    if let Some(default) = kind.default_status() {
        match values.iter_mut().find(|(name, _)| *name == "trang_thai") {
            Some((_, v)) if is_blank(v) => *v = Value::Text(default.to_string()),
            Some(_) => {}
            None => values.push(("trang_thai", Value::Text(default.to_string()))),
        }
    }

    let now = now_timestamp();
    let mut names = vec!["id"];
    let mut params = vec![Value::Text(id.clone())];
    for (name, v) in values {
        names.push(name);
        params.push(v);
    }
    names.push("created_at");
    params.push(Value::Text(now.clone()));
    names.push("updated_at");
    params.push(Value::Text(now));

    let placeholders = vec!["?"; names.len()].join(", ");
    let sql = format!(
        "INSERT INTO {}({}) VALUES({})",
        kind.table(),
        names.join(", "),
        placeholders
    );
    conn.execute(&sql, params_from_iter(params.iter()))
        .map_err(|e| match ServiceError::from(e) {
            ServiceError::Conflict(m) if m.contains("UNIQUE") && m.ends_with(".id") => {
                ServiceError::Conflict(format!("{} id already exists: {}", kind.table(), id))
            }
            other => other,
        })?;
    tracing::debug!(table = kind.table(), id = %id, "record created");
    get(conn, kind, &id)
}

fn check_id_unchanged(id: &str, fields: &Record) -> ServiceResult<()> {
    match fields.get("id").and_then(|v| v.as_str()) {
        Some(other) if other.trim() != id => {
            Err(ServiceError::validation("id", "id cannot be changed"))
        }
        _ => Ok(()),
    }
}

fn write_columns(
    conn: &Connection,
    kind: EntityKind,
    id: &str,
    values: Vec<(&'static str, Value)>,
) -> ServiceResult<()> {
    let mut sets: Vec<String> = values.iter().map(|(n, _)| format!("{n} = ?")).collect();
    sets.push("updated_at = ?".to_string());
    let mut params: Vec<Value> = values.into_iter().map(|(_, v)| v).collect();
    params.push(Value::Text(now_timestamp()));
    params.push(Value::Text(id.to_string()));
    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?",
        kind.table(),
        sets.join(", ")
    );
    conn.execute(&sql, params_from_iter(params.iter()))?;
    Ok(())
}

/// PATCH: only the given fields change.
pub fn update(conn: &Connection, kind: EntityKind, id: &str, patch: &Record) -> ServiceResult<Record> {
    check_id_unchanged(id, patch)?;
    let mut values = Vec::new();
    for (key, raw) in patch.iter() {
        if let Some(pair) = coerce_field(kind, key, raw)? {
            values.push(pair);
        }
    }
    if !exists(conn, kind, id)? {
        return Err(ServiceError::not_found(kind, id));
    }
    write_columns(conn, kind, id, values)?;
    tracing::debug!(table = kind.table(), id = %id, "record patched");
    get(conn, kind, id)
}

/// PUT: every column is overwritten, absent ones become NULL.
pub fn replace(conn: &Connection, kind: EntityKind, id: &str, full: &Record) -> ServiceResult<Record> {
    check_id_unchanged(id, full)?;
    let mut values: Vec<(&'static str, Value)> =
        kind.columns().iter().map(|c| (c.name, Value::Null)).collect();
    for (key, raw) in full.iter() {
        if let Some((name, v)) = coerce_field(kind, key, raw)? {
            if let Some(slot) = values.iter_mut().find(|(n, _)| *n == name) {
                slot.1 = v;
            }
        }
    }
    for col in kind.columns().iter().filter(|c| c.required) {
        let blank = values
            .iter()
            .find(|(n, _)| *n == col.name)
            .map(|(_, v)| is_blank(v))
            .unwrap_or(true);
        if blank {
            return Err(ServiceError::validation(col.name, "is required"));
        }
    }
    if !exists(conn, kind, id)? {
        return Err(ServiceError::not_found(kind, id));
    }
    write_columns(conn, kind, id, values)?;
    tracing::debug!(table = kind.table(), id = %id, "record replaced");
    get(conn, kind, id)
}

pub fn delete(conn: &Connection, kind: EntityKind, id: &str) -> ServiceResult<()> {
    let n = conn.execute(&format!("DELETE FROM {} WHERE id = ?", kind.table()), [id])?;
    if n == 0 {
        return Err(ServiceError::not_found(kind, id));
    }
    tracing::debug!(table = kind.table(), id = %id, "record deleted");
    Ok(())
}

/// Case-insensitive substring match on one text column, done in Rust so
/// non-ASCII names fold correctly.
pub fn search_text(
    conn: &Connection,
    kind: EntityKind,
    column: &str,
    needle: &str,
) -> ServiceResult<Vec<Record>> {
    column_kind(kind, column)?;
    let needle = needle.trim().to_lowercase();
    let all = list(conn, kind, &ListQuery::default())?;
    Ok(all
        .into_iter()
        .filter(|r| {
            r.get(column)
                .and_then(|v| v.as_str())
                .map(|s| s.to_lowercase().contains(&needle))
                .unwrap_or(false)
        })
        .collect())
}

/// Students enrolled in a class, with the enrollment id and status attached.
pub fn class_roster(conn: &Connection, class_id: &str) -> ServiceResult<Vec<Record>> {
    if !exists(conn, EntityKind::Class, class_id)? {
        return Err(ServiceError::not_found(EntityKind::Class, class_id));
    }
    let sql = format!(
        "SELECT {}, e.id, e.trang_thai
         FROM enrollments e
         JOIN students s ON s.id = e.hoc_sinh_id
         WHERE e.lop_chi_tiet_id = ?
         ORDER BY s.ten_hoc_sinh, s.rowid",
        select_list(EntityKind::Student, "s")
    );
    joined_with_enrollment(conn, EntityKind::Student, &sql, class_id)
}

/// Classes a student is enrolled in.
pub fn student_enrollments(conn: &Connection, student_id: &str) -> ServiceResult<Vec<Record>> {
    if !exists(conn, EntityKind::Student, student_id)? {
        return Err(ServiceError::not_found(EntityKind::Student, student_id));
    }
    let sql = format!(
        "SELECT {}, e.id, e.trang_thai
         FROM enrollments e
         JOIN classes c ON c.id = e.lop_chi_tiet_id
         WHERE e.hoc_sinh_id = ?
         ORDER BY c.ten_lop_full, c.rowid",
        select_list(EntityKind::Class, "c")
    );
    joined_with_enrollment(conn, EntityKind::Class, &sql, student_id)
}

fn joined_with_enrollment(
    conn: &Connection,
    kind: EntityKind,
    sql: &str,
    key: &str,
) -> ServiceResult<Vec<Record>> {
    let base = kind.columns().len() + 3;
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([key], |r| {
            let mut rec = row_to_record(kind, r)?;
            let enrollment_id: String = r.get(base)?;
            let status: Option<String> = r.get(base + 1)?;
            let label = status
                .as_deref()
                .map(|s| EntityKind::Enrollment.status_label(s).unwrap_or(s).to_string());
            rec.insert("enrollment_id".into(), json!(enrollment_id));
            rec.insert("enrollment_trang_thai".into(), json!(status));
            rec.insert("enrollment_trang_thai_label".into(), json!(label));
            Ok(rec)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Marks a pending request approved and creates its follow-up task in one
/// transaction. Returns `(request, task)`.
pub fn approve_request(
    conn: &Connection,
    request_id: &str,
    task: &Record,
) -> ServiceResult<(Record, Record)> {
    let tx = conn.unchecked_transaction()?;
    let request = get(&tx, EntityKind::Request, request_id)?;
    ensure_pending(&request)?;

    let mut patch = Record::new();
    patch.insert("trang_thai".into(), json!("da_duyet"));
    let request = update(&tx, EntityKind::Request, request_id, &patch)?;

    let mut fields = task.clone();
    fields.insert("de_xuat_id".into(), json!(request_id));
    for (task_key, request_key) in [
        ("ten_viec", "tieu_de"),
        ("mo_ta", "noi_dung"),
        ("han_chot", "ngay_ket_thuc"),
        ("nguoi_phu_trach_id", "nguoi_de_xuat_id"),
    ] {
        if !fields.contains_key(task_key) {
            if let Some(v) = request.get(request_key).filter(|v| !v.is_null()) {
                fields.insert(task_key.into(), v.clone());
            }
        }
    }
    let task = create(&tx, EntityKind::Task, &fields)?;
    tx.commit()?;
    tracing::info!(request_id, task_id = ?task.get("id"), "request approved");
    Ok((request, task))
}

pub fn reject_request(conn: &Connection, request_id: &str) -> ServiceResult<Record> {
    let request = get(conn, EntityKind::Request, request_id)?;
    ensure_pending(&request)?;
    let mut patch = Record::new();
    patch.insert("trang_thai".into(), json!("tu_choi"));
    update(conn, EntityKind::Request, request_id, &patch)
}

fn ensure_pending(request: &Record) -> ServiceResult<()> {
    let status = request
        .get("trang_thai")
        .and_then(|v| v.as_str())
        .unwrap_or("cho_duyet");
    if status != "cho_duyet" {
        return Err(ServiceError::Conflict(format!(
            "request is not pending (status: {})",
            status
        )));
    }
    Ok(())
}
