use crate::model::{ColumnKind, EntityKind};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "schoold.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    for kind in EntityKind::ALL {
        conn.execute(&entity_table_ddl(kind), [])?;
        // Workspaces created by older builds may lack newer columns.
        ensure_entity_columns(conn, kind)?;
        for col in kind.columns() {
            if matches!(col.kind, ColumnKind::Reference(_)) {
                conn.execute(
                    &format!(
                        "CREATE INDEX IF NOT EXISTS idx_{table}_{col} ON {table}({col})",
                        table = kind.table(),
                        col = col.name
                    ),
                    [],
                )?;
            }
        }
    }

    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_enrollments_student_class
         ON enrollments(hoc_sinh_id, lop_chi_tiet_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS command_history(
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            input TEXT NOT NULL,
            intent TEXT,
            reply TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS email_outbox(
            id TEXT PRIMARY KEY,
            recipient TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn entity_table_ddl(kind: EntityKind) -> String {
    let mut cols = vec!["id TEXT PRIMARY KEY".to_string()];
    let mut fks = Vec::new();
    for col in kind.columns() {
        // NOT NULL is left to the service layer so PATCH can report the field by name.
        cols.push(format!("{} {}", col.name, col.kind.sql_type()));
        if let ColumnKind::Reference(target) = col.kind {
            fks.push(format!(
                "FOREIGN KEY({}) REFERENCES {}(id)",
                col.name,
                target.table()
            ));
        }
    }
    cols.push("created_at TEXT NOT NULL".to_string());
    cols.push("updated_at TEXT NOT NULL".to_string());
    cols.extend(fks);
    format!(
        "CREATE TABLE IF NOT EXISTS {}(\n    {}\n)",
        kind.table(),
        cols.join(",\n    ")
    )
}

fn ensure_entity_columns(conn: &Connection, kind: EntityKind) -> anyhow::Result<()> {
    for col in kind.columns() {
        if table_has_column(conn, kind.table(), col.name)? {
            continue;
        }
        let mut sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            kind.table(),
            col.name,
            col.kind.sql_type()
        );
        if let ColumnKind::Reference(target) = col.kind {
            sql.push_str(&format!(" REFERENCES {}(id)", target.table()));
        }
        conn.execute(&sql, [])?;
    }
    Ok(())
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn settings_get_usize(conn: &Connection, key: &str) -> Option<usize> {
    settings_get_json(conn, key)
        .ok()
        .flatten()
        .and_then(|v| v.as_u64())
        .and_then(|v| usize::try_from(v).ok())
}
