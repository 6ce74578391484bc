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

#[test]
fn health_and_schema_work_without_a_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["workspacePath"], serde_json::Value::Null);
    assert_eq!(health["commandState"], json!("idle"));

    let schema = request_ok(&mut stdin, &mut reader, "2", "schema.describe", json!({}));
    let entities = schema["entities"].as_array().cloned().unwrap_or_default();
    assert_eq!(entities.len(), 16);

    let one = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schema.describe",
        json!({ "entity": "enrollments" }),
    );
    let columns = one["entities"][0]["columns"].as_array().cloned().unwrap_or_default();
    assert!(columns
        .iter()
        .any(|c| c["name"] == json!("hoc_sinh_id") && c["references"] == json!("students")));
}

#[test]
fn every_method_family_routes() {
    let workspace = temp_dir("schoold-router-smoke");
    let bundle = workspace.join("smoke.zip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let methods: Vec<(&str, serde_json::Value)> = vec![
        ("settings.get", json!({})),
        ("records.list", json!({ "entity": "assets" })),
        ("finance.list", json!({ "limit": 5 })),
        ("payroll.list", json!({})),
        ("table.query", json!({ "data": [] })),
        ("command.history", json!({})),
        ("command.outbox", json!({})),
        ("backup.exportWorkspaceBundle", json!({ "outPath": bundle.to_string_lossy() })),
    ];
    for (i, (method, params)) in methods.into_iter().enumerate() {
        request_ok(&mut stdin, &mut reader, &format!("m{}", i), method, params);
    }

    for (i, method) in ["classes.roster", "students.enrollments", "requests.reject"]
        .iter()
        .enumerate()
    {
        let payload = json!({ "id": format!("r{}", i), "method": method, "params": {} });
        writeln!(stdin, "{}", payload).expect("write request");
        stdin.flush().expect("flush request");
        let mut line = String::new();
        reader.read_line(&mut line).expect("read response line");
        let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value["error"]["code"], json!("bad_params"), "{}", method);
    }
}

#[test]
fn unknown_methods_and_bad_lines_get_error_replies() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value["ok"], json!(false));
    assert_eq!(value["error"]["code"], json!("bad_json"));

    let payload = json!({ "id": "u1", "method": "grades.compute", "params": {} });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value["id"], json!("u1"));
    assert_eq!(value["error"]["code"], json!("not_implemented"));

    let health = request_ok(&mut stdin, &mut reader, "h", "health", json!({}));
    assert!(health["version"].as_str().is_some());
}
