use crate::backup;
use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

/// `params.workspacePath` when given, else the selected workspace.
fn target_workspace(state: &AppState, params: &serde_json::Value) -> Result<PathBuf, HandlerErr> {
    params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
        .ok_or_else(HandlerErr::no_workspace)
}

fn io_failed(e: anyhow::Error, path: &str) -> HandlerErr {
    HandlerErr::new("io_failed", format!("{:#}", e)).with_details(json!({ "path": path }))
}

fn export_bundle(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let out_path = get_required_str(params, "outPath")?;
    let workspace = target_workspace(state, params)?;

    let summary = backup::export_workspace_bundle(&workspace, &PathBuf::from(&out_path))
        .map_err(|e| io_failed(e, &out_path))?;
    tracing::info!(path = %out_path, sha256 = %summary.db_sha256, "workspace bundle exported");
    Ok(json!({
        "path": out_path,
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "dbSha256": summary.db_sha256,
    }))
}

fn import_bundle(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let in_path = get_required_str(params, "inPath")?;
    let workspace = target_workspace(state, params)?;
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr::new("not_found", "bundle file not found")
            .with_details(json!({ "path": in_path })));
    }

    // The database file is about to be replaced underneath any open handle.
    let replacing_open = state.workspace.as_deref() == Some(workspace.as_path());
    if replacing_open {
        state.db = None;
    }
    let summary = match backup::import_workspace_bundle(&src, &workspace) {
        Ok(summary) => summary,
        Err(e) => {
            // A failed import never touches the live file; reopen it.
            if replacing_open {
                match db::open_db(&workspace) {
                    Ok(conn) => state.db = Some(conn),
                    Err(reopen) => {
                        tracing::error!(error = %format!("{:#}", reopen), "failed to reopen workspace after import error");
                        state.workspace = None;
                    }
                }
            }
            return Err(io_failed(e, &in_path));
        }
    };

    let conn = match db::open_db(&workspace) {
        Ok(conn) => conn,
        Err(e) => {
            if replacing_open {
                state.workspace = None;
            }
            return Err(HandlerErr::new("db_open_failed", format!("{:#}", e)));
        }
    };
    state.workspace = Some(workspace.clone());
    state.db = Some(conn);
    tracing::info!(path = %in_path, format = %summary.bundle_format_detected, "workspace bundle imported");
    Ok(json!({
        "workspacePath": workspace.to_string_lossy(),
        "bundleFormatDetected": summary.bundle_format_detected,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(respond(&req.id, export_bundle(state, &req.params))),
        "backup.importWorkspaceBundle" => Some(respond(&req.id, import_bundle(state, &req.params))),
        _ => None,
    }
}
