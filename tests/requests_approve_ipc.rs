use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .env_remove("SCHOOLD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> String {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "expected failure: {}", value);
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

#[test]
fn approving_a_request_creates_its_task_atomically() {
    let workspace = temp_dir("schoold-requests-approve");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let employee = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "employees.create",
        json!({ "record": { "ten_nhan_su": "Ngô Bình" } }),
    );
    let employee_id = employee["record"]["id"].as_str().expect("employee id").to_string();
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "requests.create",
        json!({ "record": {
            "tieu_de": "Mua bảng trắng",
            "nguoi_de_xuat_id": employee_id,
            "noi_dung": "Phòng 204 cần bảng mới",
            "ngay_ket_thuc": "2026-11-30"
        } }),
    );
    let request_id = created["record"]["id"].as_str().expect("request id").to_string();
    assert_eq!(created["record"]["trang_thai"], json!("cho_duyet"));

    let failed = request(
        &mut stdin,
        &mut reader,
        "4",
        "requests.approve",
        json!({ "requestId": request_id, "task": { "nguoi_phu_trach_id": "missing-employee" } }),
    );
    assert_eq!(error_code(&failed), "conflict");
    let still_pending = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "requests.get",
        json!({ "id": request_id }),
    );
    assert_eq!(still_pending["record"]["trang_thai"], json!("cho_duyet"));
    let tasks = request_ok(&mut stdin, &mut reader, "6", "tasks.list", json!({}));
    assert_eq!(tasks["records"].as_array().map(|a| a.len()), Some(0));

    let approved = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "requests.approve",
        json!({ "requestId": request_id }),
    );
    assert_eq!(approved["request"]["trang_thai"], json!("da_duyet"));
    assert_eq!(approved["request"]["trang_thai_label"], json!("Đã duyệt"));
    assert_eq!(approved["task"]["ten_viec"], json!("Mua bảng trắng"));
    assert_eq!(approved["task"]["de_xuat_id"], json!(request_id));
    assert_eq!(approved["task"]["nguoi_phu_trach_id"], json!(employee_id));
    assert_eq!(approved["task"]["han_chot"], json!("2026-11-30"));
    assert_eq!(approved["task"]["trang_thai"], json!("can_lam"));

    let again = request(
        &mut stdin,
        &mut reader,
        "8",
        "requests.approve",
        json!({ "requestId": request_id }),
    );
    assert_eq!(error_code(&again), "conflict");
}

#[test]
fn rejecting_requires_a_pending_request() {
    let workspace = temp_dir("schoold-requests-reject");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let missing = request(
        &mut stdin,
        &mut reader,
        "2",
        "requests.reject",
        json!({ "requestId": "nope" }),
    );
    assert_eq!(error_code(&missing), "not_found");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "requests.create",
        json!({ "record": { "tieu_de": "Nghỉ phép" } }),
    );
    let request_id = created["record"]["id"].as_str().expect("request id").to_string();
    let rejected = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "requests.reject",
        json!({ "requestId": request_id }),
    );
    assert_eq!(rejected["request"]["trang_thai"], json!("tu_choi"));

    let late = request(
        &mut stdin,
        &mut reader,
        "5",
        "requests.approve",
        json!({ "requestId": request_id }),
    );
    assert_eq!(error_code(&late), "conflict");

    let missing_param = request(&mut stdin, &mut reader, "6", "requests.approve", json!({}));
    assert_eq!(error_code(&missing_param), "bad_params");
}
