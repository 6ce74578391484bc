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

fn student_columns() -> serde_json::Value {
    json!([
        { "key": "ten_hoc_sinh", "title": "Họ tên", "sortable": true },
        { "key": "ngay_sinh", "title": "Ngày sinh", "sortable": true, "render": "date" },
        { "key": "trang_thai", "title": "Trạng thái", "render": "status" }
    ])
}

#[test]
fn entity_backed_query_searches_sorts_and_pages() {
    let workspace = temp_dir("schoold-table-entity");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let students = [
        ("Lê Minh", "2014-03-05", "dang_hoc"),
        ("Phạm An", "2015-11-20", "bao_luu"),
        ("Đỗ Anh", "2013-01-09", "dang_hoc"),
        ("Hồ Quang", "2014-07-30", "dang_hoc"),
    ];
    for (i, (name, dob, status)) in students.iter().enumerate() {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "students.create",
            json!({ "record": { "ten_hoc_sinh": name, "ngay_sinh": dob, "trang_thai": status } }),
        );
    }

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "q1",
        "table.query",
        json!({
            "entity": "students",
            "columns": student_columns(),
            "sort": { "key": "ten_hoc_sinh", "direction": "asc" },
            "page": 1,
            "pageSize": 3
        }),
    );
    assert_eq!(res["totalRows"], json!(4));
    assert_eq!(res["totalPages"], json!(2));
    assert_eq!(res["rows"].as_array().map(|a| a.len()), Some(3));

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "q2",
        "table.query",
        json!({
            "entity": "students",
            "columns": student_columns(),
            "search": "bảo lưu"
        }),
    );
    assert_eq!(res["totalRows"], json!(1));
    assert_eq!(res["cells"][0], json!(["Phạm An", "20/11/2015", "Bảo lưu"]));

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "q3",
        "table.query",
        json!({
            "entity": "students",
            "columns": student_columns(),
            "sort": { "key": "ngay_sinh", "direction": "asc" },
            "toggleSort": "ngay_sinh",
            "page": 99,
            "pageSize": 2
        }),
    );
    assert_eq!(res["page"], json!(2));
    assert_eq!(res["sort"]["direction"], json!("desc"));
    assert_eq!(res["cells"][1][0], json!("Đỗ Anh"));
}

#[test]
fn inline_non_array_data_reports_no_results() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "table.query",
        json!({ "data": { "oops": true }, "columns": [{ "key": "oops" }] }),
    );
    assert_eq!(res["totalRows"], json!(0));
    assert_eq!(res["emptyMessage"], json!("Không có kết quả"));

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "table.query",
        json!({
            "data": [{ "hoc_phi": 1500000 }, { "hoc_phi": 250000 }],
            "columns": [{ "key": "hoc_phi", "render": "currency", "sortable": true }],
            "sort": { "key": "hoc_phi", "direction": "asc" }
        }),
    );
    assert_eq!(res["cells"], json!([["250.000 ₫"], ["1.500.000 ₫"]]));
    assert!(res.get("emptyMessage").is_none());
}

#[test]
fn workspace_page_size_setting_applies_when_request_omits_it() {
    let workspace = temp_dir("schoold-table-pagesize");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "settings.set",
        json!({ "key": "table.pageSize", "value": 2 }),
    );
    let data: Vec<_> = (0..5).map(|i| json!({ "n": i })).collect();
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "table.query",
        json!({ "data": data, "columns": [{ "key": "n" }] }),
    );
    assert_eq!(res["pageSize"], json!(2));
    assert_eq!(res["totalPages"], json!(3));
}
