use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_object, get_required_str, require_db};
use crate::ipc::types::{AppState, Request};
use crate::service;
use serde_json::json;

fn classes_roster(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let class_id = get_required_str(params, "classId")?;
    let students = service::class_roster(conn, &class_id)?;
    Ok(json!({ "classId": class_id, "students": students }))
}

fn students_enrollments(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_str(params, "studentId")?;
    let classes = service::student_enrollments(conn, &student_id)?;
    Ok(json!({ "studentId": student_id, "classes": classes }))
}

fn requests_approve(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let request_id = get_required_str(params, "requestId")?;
    let task = get_object(params, "task")?;
    let (request, task) = service::approve_request(conn, &request_id, &task)?;
    Ok(json!({ "request": request, "task": task }))
}

fn requests_reject(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let request_id = get_required_str(params, "requestId")?;
    let request = service::reject_request(conn, &request_id)?;
    Ok(json!({ "request": request }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "classes.roster" => classes_roster(state, &req.params),
        "students.enrollments" => students_enrollments(state, &req.params),
        "requests.approve" => requests_approve(state, &req.params),
        "requests.reject" => requests_reject(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
