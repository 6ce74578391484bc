//! Command box back end: takes free text plus an externally computed intent,
//! runs the matching handler against the workspace and keeps a bounded history.

use crate::model::EntityKind;
use crate::service::{self, ListQuery, Record, ServiceError};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

const UNRECOGNIZED_REPLY: &str = "Xin lỗi, tôi chưa hiểu yêu cầu này.\n\
Bạn có thể thêm học sinh, cập nhật thông tin học sinh, tra cứu học sinh hoặc gửi email.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    AddStudent,
    UpdateStudent,
    SendEmail,
    CheckInfo,
}

impl Intent {
    pub fn parse(label: &str) -> Option<Intent> {
        match label.trim() {
            "add_student" => Some(Intent::AddStudent),
            "update_student" => Some(Intent::UpdateStudent),
            "send_email" => Some(Intent::SendEmail),
            "check_info" => Some(Intent::CheckInfo),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Intent::AddStudent => "add_student",
            Intent::UpdateStudent => "update_student",
            Intent::SendEmail => "send_email",
            Intent::CheckInfo => "check_info",
        }
    }
}

/// Output of the external classifier for one input.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Classification {
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub data: Record,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("a command is already being processed")]
    Busy,
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::Busy => "busy",
            CommandError::Service(e) => e.code(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Submitting,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Submitting => "submitting",
        }
    }
}

/// Single in-flight submission guard.
///
/// The stdin loop handles one request at a time, so `Busy` is only reachable
/// by a host that overlaps submissions on one session (an async classifier
/// round-trip, for example). Over the current transport `health` always
/// reports `idle` between requests.
#[derive(Debug, Default)]
pub struct CommandSession {
    state: SessionState,
}

impl CommandSession {
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn begin(&mut self) -> Result<(), CommandError> {
        if self.state == SessionState::Submitting {
            return Err(CommandError::Busy);
        }
        self.state = SessionState::Submitting;
        Ok(())
    }

    fn finish(&mut self) {
        self.state = SessionState::Idle;
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub seq: i64,
    pub input: String,
    pub intent: Option<String>,
    pub reply: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub submitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<HistoryEntry>,
    pub reply: String,
    pub paragraphs: Vec<String>,
}

impl SubmitOutcome {
    pub fn skipped() -> Self {
        SubmitOutcome {
            submitted: false,
            entry: None,
            reply: String::new(),
            paragraphs: Vec::new(),
        }
    }
}

pub fn paragraphs(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn submit(
    session: &mut CommandSession,
    conn: &Connection,
    text: &str,
    classification: Option<&Classification>,
    history_limit: usize,
) -> Result<SubmitOutcome, CommandError> {
    let input = text.trim();
    if input.is_empty() {
        return Ok(SubmitOutcome::skipped());
    }
    session.begin()?;
    let result = run_submission(conn, input, classification, history_limit);
    session.finish();
    result
}

fn run_submission(
    conn: &Connection,
    input: &str,
    classification: Option<&Classification>,
    history_limit: usize,
) -> Result<SubmitOutcome, CommandError> {
    let intent = classification.and_then(|c| Intent::parse(&c.intent));
    let reply = match (intent, classification) {
        (Some(intent), Some(c)) => dispatch(conn, intent, &c.data)?,
        _ => UNRECOGNIZED_REPLY.to_string(),
    };
    tracing::info!(
        intent = intent.map(Intent::as_str).unwrap_or("unrecognized"),
        "command handled"
    );
    let entry = append_history(
        conn,
        input,
        intent.map(Intent::as_str),
        &reply,
        history_limit,
    )?;
    Ok(SubmitOutcome {
        submitted: true,
        paragraphs: paragraphs(&reply),
        reply,
        entry: Some(entry),
    })
}

/// Runs one intent. Input problems become reply text; storage failures are errors.
pub fn dispatch(conn: &Connection, intent: Intent, data: &Record) -> Result<String, ServiceError> {
    let result = match intent {
        Intent::AddStudent => add_student(conn, data),
        Intent::UpdateStudent => update_student(conn, data),
        Intent::SendEmail => send_email(conn, data),
        Intent::CheckInfo => check_info(conn, data),
    };
    match result {
        Ok(reply) => Ok(reply),
        Err(ServiceError::Database(e)) => Err(ServiceError::Database(e)),
        Err(e) => Ok(format!("Không thể thực hiện yêu cầu: {}", e)),
    }
}

fn str_field<'a>(data: &'a Record, key: &str) -> Option<&'a str> {
    data.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn add_student(conn: &Connection, data: &Record) -> Result<String, ServiceError> {
    let student = service::create(conn, EntityKind::Student, data)?;
    Ok(format!(
        "Đã thêm học sinh {} (mã {}).",
        student.get("ten_hoc_sinh").and_then(|v| v.as_str()).unwrap_or(""),
        student.get("id").and_then(|v| v.as_str()).unwrap_or("")
    ))
}

enum StudentLookup {
    Found(Record),
    Missing(String),
    Ambiguous(String, usize),
}

fn find_student(conn: &Connection, data: &Record) -> Result<StudentLookup, ServiceError> {
    if let Some(id) = str_field(data, "id").or_else(|| str_field(data, "hoc_sinh_id")) {
        return match service::get(conn, EntityKind::Student, id) {
            Ok(s) => Ok(StudentLookup::Found(s)),
            Err(ServiceError::NotFound { .. }) => Ok(StudentLookup::Missing(id.to_string())),
            Err(e) => Err(e),
        };
    }
    let Some(name) = str_field(data, "ten_hoc_sinh") else {
        return Err(ServiceError::validation(
            "ten_hoc_sinh",
            "cần mã hoặc tên học sinh",
        ));
    };
    let mut eq = Record::new();
    eq.insert("ten_hoc_sinh".into(), json!(name));
    let mut matches = service::list(
        conn,
        EntityKind::Student,
        &ListQuery {
            eq,
            ..ListQuery::default()
        },
    )?;
    match matches.len() {
        0 => Ok(StudentLookup::Missing(name.to_string())),
        1 => Ok(StudentLookup::Found(matches.remove(0))),
        n => Ok(StudentLookup::Ambiguous(name.to_string(), n)),
    }
}

fn update_student(conn: &Connection, data: &Record) -> Result<String, ServiceError> {
    let by_id = str_field(data, "id").is_some() || str_field(data, "hoc_sinh_id").is_some();
    let student = match find_student(conn, data)? {
        StudentLookup::Found(s) => s,
        StudentLookup::Missing(key) => {
            return Ok(format!("Không tìm thấy học sinh '{}'.", key));
        }
        StudentLookup::Ambiguous(name, n) => {
            return Ok(format!(
                "Có {} học sinh tên '{}'. Vui lòng cung cấp mã học sinh.",
                n, name
            ));
        }
    };
    let mut patch = data.clone();
    patch.remove("id");
    patch.remove("hoc_sinh_id");
    if !by_id {
        patch.remove("ten_hoc_sinh");
    }
    if let Some(new_name) = patch.remove("ten_hoc_sinh_moi") {
        patch.insert("ten_hoc_sinh".into(), new_name);
    }
    if patch.is_empty() {
        return Ok("Không có thông tin nào cần cập nhật.".to_string());
    }
    let id = student.get("id").and_then(|v| v.as_str()).unwrap_or("");
    let updated = service::update(conn, EntityKind::Student, id, &patch)?;
    let mut fields: Vec<&str> = patch.keys().map(String::as_str).collect();
    fields.sort_unstable();
    Ok(format!(
        "Đã cập nhật học sinh {}: {}.",
        updated.get("ten_hoc_sinh").and_then(|v| v.as_str()).unwrap_or(""),
        fields.join(", ")
    ))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEmail {
    pub id: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub status: String,
    pub created_at: String,
}

fn send_email(conn: &Connection, data: &Record) -> Result<String, ServiceError> {
    let recipient = match str_field(data, "to").or_else(|| str_field(data, "recipient")) {
        Some(to) => to.to_string(),
        None => {
            let has_student_key = ["id", "hoc_sinh_id", "ten_hoc_sinh"]
                .iter()
                .any(|k| str_field(data, k).is_some());
            if !has_student_key {
                return Ok("Thiếu địa chỉ email người nhận.".to_string());
            }
            match find_student(conn, data)? {
                StudentLookup::Found(s) => match str_field(&s, "email_phu_huynh") {
                    Some(email) => email.to_string(),
                    None => return Ok("Học sinh này chưa có email phụ huynh.".to_string()),
                },
                StudentLookup::Missing(key) => {
                    return Ok(format!("Không tìm thấy học sinh '{}'.", key))
                }
                StudentLookup::Ambiguous(name, n) => {
                    return Ok(format!(
                        "Có {} học sinh tên '{}'. Vui lòng cung cấp mã học sinh.",
                        n, name
                    ))
                }
            }
        }
    };
    if !recipient.contains('@') {
        return Err(ServiceError::validation("to", "địa chỉ email không hợp lệ"));
    }
    let subject = str_field(data, "subject").unwrap_or("(không có tiêu đề)");
    let body = data.get("body").and_then(|v| v.as_str()).unwrap_or("");
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO email_outbox(id, recipient, subject, body, status, created_at)
         VALUES(?, ?, ?, ?, 'queued', ?)",
        (&id, &recipient, subject, body, service::now_timestamp()),
    )?;
    Ok(format!("Đã đưa email '{}' gửi tới {} vào hàng đợi.", subject, recipient))
}

pub fn list_outbox(conn: &Connection) -> Result<Vec<OutboxEmail>, ServiceError> {
    let mut stmt = conn.prepare(
        "SELECT id, recipient, subject, body, status, created_at
         FROM email_outbox
         ORDER BY created_at, rowid",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(OutboxEmail {
                id: r.get(0)?,
                recipient: r.get(1)?,
                subject: r.get(2)?,
                body: r.get(3)?,
                status: r.get(4)?,
                created_at: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn check_info(conn: &Connection, data: &Record) -> Result<String, ServiceError> {
    let students = if let Some(id) = str_field(data, "id").or_else(|| str_field(data, "hoc_sinh_id")) {
        match service::get(conn, EntityKind::Student, id) {
            Ok(s) => vec![s],
            Err(ServiceError::NotFound { .. }) => Vec::new(),
            Err(e) => return Err(e),
        }
    } else {
        let Some(needle) = str_field(data, "ten_hoc_sinh").or_else(|| str_field(data, "query"))
        else {
            return Ok("Bạn muốn tra cứu học sinh nào?".to_string());
        };
        service::search_text(conn, EntityKind::Student, "ten_hoc_sinh", needle)?
    };

    if students.is_empty() {
        return Ok("Không tìm thấy học sinh phù hợp.".to_string());
    }

    let mut lines = vec![format!("Tìm thấy {} học sinh:", students.len())];
    for s in &students {
        let id = s.get("id").and_then(|v| v.as_str()).unwrap_or("");
        let classes: Vec<String> = service::student_enrollments(conn, id)?
            .iter()
            .filter_map(|c| c.get("ten_lop_full").and_then(|v| v.as_str()))
            .map(str::to_string)
            .collect();
        let mut line = format!(
            "- {} ({})",
            s.get("ten_hoc_sinh").and_then(|v| v.as_str()).unwrap_or(""),
            s.get("trang_thai_label").and_then(|v| v.as_str()).unwrap_or("-"),
        );
        if let Some(dob) = str_field(s, "ngay_sinh") {
            line.push_str(&format!(", ngày sinh {}", dob));
        }
        if classes.is_empty() {
            line.push_str(", chưa ghi danh lớp nào");
        } else {
            line.push_str(&format!(", lớp: {}", classes.join(", ")));
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

/// Appends one entry and evicts the oldest ones beyond `limit`.
pub fn append_history(
    conn: &Connection,
    input: &str,
    intent: Option<&str>,
    reply: &str,
    limit: usize,
) -> Result<HistoryEntry, ServiceError> {
    let created_at = service::now_timestamp();
    conn.execute(
        "INSERT INTO command_history(input, intent, reply, created_at) VALUES(?, ?, ?, ?)",
        (input, intent, reply, &created_at),
    )?;
    let seq = conn.last_insert_rowid();
    conn.execute(
        "DELETE FROM command_history
         WHERE seq NOT IN (SELECT seq FROM command_history ORDER BY seq DESC LIMIT ?)",
        [i64::try_from(limit.max(1)).unwrap_or(i64::MAX)],
    )?;
    Ok(HistoryEntry {
        seq,
        input: input.to_string(),
        intent: intent.map(str::to_string),
        reply: reply.to_string(),
        created_at,
    })
}

/// Oldest first.
pub fn list_history(conn: &Connection) -> Result<Vec<HistoryEntry>, ServiceError> {
    let mut stmt = conn.prepare(
        "SELECT seq, input, intent, reply, created_at FROM command_history ORDER BY seq",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(HistoryEntry {
                seq: r.get(0)?,
                input: r.get(1)?,
                intent: r.get(2)?,
                reply: r.get(3)?,
                created_at: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn clear_history(conn: &Connection) -> Result<usize, ServiceError> {
    Ok(conn.execute("DELETE FROM command_history", [])?)
}
