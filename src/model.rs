use chrono::NaiveDate;
use rusqlite::types::Value;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Student,
    Employee,
    Facility,
    Class,
    Enrollment,
    TeachingSession,
    Attendance,
    Asset,
    Finance,
    Task,
    Request,
    Admission,
    Contact,
    File,
    Image,
    Payroll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Real,
    /// `YYYY-MM-DD`
    Date,
    /// `YYYY-MM`
    Month,
    Reference(EntityKind),
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub required: bool,
}

const fn opt(name: &'static str, kind: ColumnKind) -> ColumnDef {
    ColumnDef {
        name,
        kind,
        required: false,
    }
}

const fn req(name: &'static str, kind: ColumnKind) -> ColumnDef {
    ColumnDef {
        name,
        kind,
        required: true,
    }
}

use ColumnKind::{Date, Integer, Month, Real, Reference, Text};

const STUDENT_COLUMNS: &[ColumnDef] = &[
    req("ten_hoc_sinh", Text),
    opt("ngay_sinh", Date),
    opt("gioi_tinh", Text),
    opt("co_so_id", Reference(EntityKind::Facility)),
    opt("ten_phu_huynh", Text),
    opt("sdt_phu_huynh", Text),
    opt("email_phu_huynh", Text),
    opt("dia_chi", Text),
    opt("trang_thai", Text),
    opt("ghi_chu", Text),
];

const EMPLOYEE_COLUMNS: &[ColumnDef] = &[
    req("ten_nhan_su", Text),
    opt("chuc_vu", Text),
    opt("bo_phan", Text),
    opt("email", Text),
    opt("so_dien_thoai", Text),
    opt("co_so_id", Reference(EntityKind::Facility)),
    opt("ngay_vao_lam", Date),
    opt("trang_thai", Text),
];

const FACILITY_COLUMNS: &[ColumnDef] = &[
    req("ten_co_so", Text),
    opt("dia_chi", Text),
    opt("so_dien_thoai", Text),
    opt("trang_thai", Text),
];

const CLASS_COLUMNS: &[ColumnDef] = &[
    req("ten_lop_full", Text),
    opt("ma_lop", Text),
    opt("co_so_id", Reference(EntityKind::Facility)),
    opt("chuong_trinh", Text),
    opt("ngay_bat_dau", Date),
    opt("si_so_toi_da", Integer),
    opt("trang_thai", Text),
];

const ENROLLMENT_COLUMNS: &[ColumnDef] = &[
    req("hoc_sinh_id", Reference(EntityKind::Student)),
    req("lop_chi_tiet_id", Reference(EntityKind::Class)),
    opt("ngay_ghi_danh", Date),
    opt("trang_thai", Text),
];

const TEACHING_SESSION_COLUMNS: &[ColumnDef] = &[
    req("lop_chi_tiet_id", Reference(EntityKind::Class)),
    req("ngay_hoc", Date),
    opt("giao_vien_id", Reference(EntityKind::Employee)),
    opt("thoi_gian_bat_dau", Text),
    opt("thoi_gian_ket_thuc", Text),
    opt("noi_dung", Text),
    opt("trang_thai", Text),
];

const ATTENDANCE_COLUMNS: &[ColumnDef] = &[
    req("buoi_hoc_id", Reference(EntityKind::TeachingSession)),
    req("hoc_sinh_id", Reference(EntityKind::Student)),
    opt("trang_thai", Text),
    opt("ghi_chu", Text),
];

const ASSET_COLUMNS: &[ColumnDef] = &[
    req("ten_tai_san", Text),
    opt("loai", Text),
    opt("co_so_id", Reference(EntityKind::Facility)),
    opt("so_luong", Integer),
    opt("gia_tri", Real),
    opt("trang_thai", Text),
];

const FINANCE_COLUMNS: &[ColumnDef] = &[
    req("loai_thu_chi", Text),
    req("so_tien", Real),
    opt("hoc_sinh_id", Reference(EntityKind::Student)),
    opt("co_so_id", Reference(EntityKind::Facility)),
    opt("ngay_giao_dich", Date),
    opt("dien_giai", Text),
    opt("trang_thai", Text),
];

const TASK_COLUMNS: &[ColumnDef] = &[
    req("ten_viec", Text),
    opt("nguoi_phu_trach_id", Reference(EntityKind::Employee)),
    opt("de_xuat_id", Reference(EntityKind::Request)),
    opt("han_chot", Date),
    opt("mo_ta", Text),
    opt("trang_thai", Text),
];

const REQUEST_COLUMNS: &[ColumnDef] = &[
    req("tieu_de", Text),
    opt("nguoi_de_xuat_id", Reference(EntityKind::Employee)),
    opt("loai_de_xuat", Text),
    opt("noi_dung", Text),
    opt("ngay_bat_dau", Date),
    opt("ngay_ket_thuc", Date),
    opt("trang_thai", Text),
];

const ADMISSION_COLUMNS: &[ColumnDef] = &[
    req("ten_hoc_sinh", Text),
    opt("ngay_sinh", Date),
    opt("ten_phu_huynh", Text),
    opt("sdt_phu_huynh", Text),
    opt("co_so_id", Reference(EntityKind::Facility)),
    opt("nguon", Text),
    opt("trang_thai", Text),
];

const CONTACT_COLUMNS: &[ColumnDef] = &[
    req("ten_lien_he", Text),
    opt("email", Text),
    opt("so_dien_thoai", Text),
    opt("noi_dung", Text),
    opt("trang_thai", Text),
];

const FILE_COLUMNS: &[ColumnDef] = &[
    req("ten_file", Text),
    req("duong_dan", Text),
    opt("loai_file", Text),
    opt("kich_thuoc", Integer),
    opt("nguoi_tai_len_id", Reference(EntityKind::Employee)),
];

const IMAGE_COLUMNS: &[ColumnDef] = &[
    req("ten_anh", Text),
    req("duong_dan", Text),
    opt("mo_ta", Text),
];

const PAYROLL_COLUMNS: &[ColumnDef] = &[
    req("nhan_su_id", Reference(EntityKind::Employee)),
    req("thang", Month),
    opt("luong_co_ban", Real),
    opt("phu_cap", Real),
    opt("khau_tru", Real),
    opt("thuc_linh", Real),
    opt("trang_thai", Text),
];

// First entry of each list is the default status for new records.
const STUDENT_STATUSES: &[(&str, &str)] = &[
    ("dang_hoc", "Đang học"),
    ("bao_luu", "Bảo lưu"),
    ("da_nghi", "Đã nghỉ"),
    ("tot_nghiep", "Tốt nghiệp"),
];
const EMPLOYEE_STATUSES: &[(&str, &str)] = &[
    ("dang_lam", "Đang làm việc"),
    ("nghi_phep", "Nghỉ phép"),
    ("da_nghi", "Đã nghỉ việc"),
];
const FACILITY_STATUSES: &[(&str, &str)] =
    &[("hoat_dong", "Đang hoạt động"), ("tam_dong", "Tạm đóng")];
const CLASS_STATUSES: &[(&str, &str)] = &[
    ("chua_bat_dau", "Chưa bắt đầu"),
    ("dang_hoc", "Đang học"),
    ("ket_thuc", "Đã kết thúc"),
];
const ENROLLMENT_STATUSES: &[(&str, &str)] = &[
    ("dang_hoc", "Đang học"),
    ("bao_luu", "Bảo lưu"),
    ("da_nghi", "Đã nghỉ"),
];
const SESSION_STATUSES: &[(&str, &str)] = &[
    ("du_kien", "Dự kiến"),
    ("da_day", "Đã dạy"),
    ("huy", "Đã hủy"),
];
const ATTENDANCE_STATUSES: &[(&str, &str)] = &[
    ("co_mat", "Có mặt"),
    ("vang_co_phep", "Vắng có phép"),
    ("vang_khong_phep", "Vắng không phép"),
    ("di_muon", "Đi muộn"),
];
const ASSET_STATUSES: &[(&str, &str)] = &[
    ("dang_su_dung", "Đang sử dụng"),
    ("hong", "Hỏng"),
    ("thanh_ly", "Đã thanh lý"),
];
const FINANCE_STATUSES: &[(&str, &str)] = &[
    ("cho_thanh_toan", "Chờ thanh toán"),
    ("da_thanh_toan", "Đã thanh toán"),
    ("huy", "Đã hủy"),
];
const TASK_STATUSES: &[(&str, &str)] = &[
    ("can_lam", "Cần làm"),
    ("dang_lam", "Đang làm"),
    ("hoan_thanh", "Hoàn thành"),
];
const REQUEST_STATUSES: &[(&str, &str)] = &[
    ("cho_duyet", "Chờ duyệt"),
    ("da_duyet", "Đã duyệt"),
    ("tu_choi", "Từ chối"),
];
const ADMISSION_STATUSES: &[(&str, &str)] = &[
    ("moi", "Mới"),
    ("da_lien_he", "Đã liên hệ"),
    ("da_nhap_hoc", "Đã nhập học"),
    ("huy", "Đã hủy"),
];
const CONTACT_STATUSES: &[(&str, &str)] = &[("moi", "Mới"), ("da_phan_hoi", "Đã phản hồi")];
const PAYROLL_STATUSES: &[(&str, &str)] = &[
    ("nhap", "Nháp"),
    ("da_chot", "Đã chốt"),
    ("da_tra", "Đã trả"),
];

impl EntityKind {
    pub const ALL: [EntityKind; 16] = [
        EntityKind::Student,
        EntityKind::Employee,
        EntityKind::Facility,
        EntityKind::Class,
        EntityKind::Enrollment,
        EntityKind::TeachingSession,
        EntityKind::Attendance,
        EntityKind::Asset,
        EntityKind::Finance,
        EntityKind::Task,
        EntityKind::Request,
        EntityKind::Admission,
        EntityKind::Contact,
        EntityKind::File,
        EntityKind::Image,
        EntityKind::Payroll,
    ];

    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Student => "students",
            EntityKind::Employee => "employees",
            EntityKind::Facility => "facilities",
            EntityKind::Class => "classes",
            EntityKind::Enrollment => "enrollments",
            EntityKind::TeachingSession => "teaching_sessions",
            EntityKind::Attendance => "attendance",
            EntityKind::Asset => "assets",
            EntityKind::Finance => "finance",
            EntityKind::Task => "tasks",
            EntityKind::Request => "requests",
            EntityKind::Admission => "admissions",
            EntityKind::Contact => "contacts",
            EntityKind::File => "files",
            EntityKind::Image => "images",
            EntityKind::Payroll => "payroll",
        }
    }

    pub fn from_table(name: &str) -> Option<Self> {
        let t = name.trim();
        Self::ALL.into_iter().find(|k| k.table() == t)
    }

    /// Display name used in command replies.
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Student => "Học sinh",
            EntityKind::Employee => "Nhân sự",
            EntityKind::Facility => "Cơ sở",
            EntityKind::Class => "Lớp học",
            EntityKind::Enrollment => "Ghi danh",
            EntityKind::TeachingSession => "Buổi học",
            EntityKind::Attendance => "Điểm danh",
            EntityKind::Asset => "Tài sản",
            EntityKind::Finance => "Thu chi",
            EntityKind::Task => "Công việc",
            EntityKind::Request => "Đề xuất",
            EntityKind::Admission => "Tuyển sinh",
            EntityKind::Contact => "Liên hệ",
            EntityKind::File => "Tệp",
            EntityKind::Image => "Hình ảnh",
            EntityKind::Payroll => "Bảng lương",
        }
    }

    pub fn columns(self) -> &'static [ColumnDef] {
        match self {
            EntityKind::Student => STUDENT_COLUMNS,
            EntityKind::Employee => EMPLOYEE_COLUMNS,
            EntityKind::Facility => FACILITY_COLUMNS,
            EntityKind::Class => CLASS_COLUMNS,
            EntityKind::Enrollment => ENROLLMENT_COLUMNS,
            EntityKind::TeachingSession => TEACHING_SESSION_COLUMNS,
            EntityKind::Attendance => ATTENDANCE_COLUMNS,
            EntityKind::Asset => ASSET_COLUMNS,
            EntityKind::Finance => FINANCE_COLUMNS,
            EntityKind::Task => TASK_COLUMNS,
            EntityKind::Request => REQUEST_COLUMNS,
            EntityKind::Admission => ADMISSION_COLUMNS,
            EntityKind::Contact => CONTACT_COLUMNS,
            EntityKind::File => FILE_COLUMNS,
            EntityKind::Image => IMAGE_COLUMNS,
            EntityKind::Payroll => PAYROLL_COLUMNS,
        }
    }

    pub fn column(self, name: &str) -> Option<&'static ColumnDef> {
        self.columns().iter().find(|c| c.name == name)
    }

    pub fn statuses(self) -> &'static [(&'static str, &'static str)] {
        match self {
            EntityKind::Student => STUDENT_STATUSES,
            EntityKind::Employee => EMPLOYEE_STATUSES,
            EntityKind::Facility => FACILITY_STATUSES,
            EntityKind::Class => CLASS_STATUSES,
            EntityKind::Enrollment => ENROLLMENT_STATUSES,
            EntityKind::TeachingSession => SESSION_STATUSES,
            EntityKind::Attendance => ATTENDANCE_STATUSES,
            EntityKind::Asset => ASSET_STATUSES,
            EntityKind::Finance => FINANCE_STATUSES,
            EntityKind::Task => TASK_STATUSES,
            EntityKind::Request => REQUEST_STATUSES,
            EntityKind::Admission => ADMISSION_STATUSES,
            EntityKind::Contact => CONTACT_STATUSES,
            EntityKind::File | EntityKind::Image => &[],
            EntityKind::Payroll => PAYROLL_STATUSES,
        }
    }

    pub fn has_status(self) -> bool {
        self.column("trang_thai").is_some()
    }

    pub fn default_status(self) -> Option<&'static str> {
        self.statuses().first().map(|(code, _)| *code)
    }

    pub fn status_label(self, code: &str) -> Option<&'static str> {
        self.statuses()
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, label)| *label)
    }
}

impl ColumnKind {
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Real => "REAL",
            ColumnKind::Text | ColumnKind::Date | ColumnKind::Month | ColumnKind::Reference(_) => {
                "TEXT"
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnKind::Text => "text",
            ColumnKind::Integer => "integer",
            ColumnKind::Real => "real",
            ColumnKind::Date => "date",
            ColumnKind::Month => "month",
            ColumnKind::Reference(_) => "reference",
        }
    }

    /// Converts a JSON field into the SQLite value stored for this column.
    /// Blank strings on date/month/reference columns are stored as NULL.
    pub fn coerce(self, v: &serde_json::Value) -> Result<Value, String> {
        if v.is_null() {
            return Ok(Value::Null);
        }
        match self {
            ColumnKind::Text => match v {
                serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
                serde_json::Value::Number(n) => Ok(Value::Text(n.to_string())),
                serde_json::Value::Bool(b) => Ok(Value::Text(b.to_string())),
                _ => Err("must be a string".to_string()),
            },
            ColumnKind::Integer => {
                if let Some(n) = v.as_i64() {
                    return Ok(Value::Integer(n));
                }
                if let Some(f) = v.as_f64() {
                    // 2^63: `as i64` would saturate at or beyond it.
                    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
                    if f.fract() == 0.0 && f >= -LIMIT && f < LIMIT {
                        return Ok(Value::Integer(f as i64));
                    }
                    return Err("must be an integer".to_string());
                }
                match v.as_str().map(str::trim) {
                    Some("") => Ok(Value::Null),
                    Some(s) => s
                        .parse::<i64>()
                        .map(Value::Integer)
                        .map_err(|_| "must be an integer".to_string()),
                    None => Err("must be an integer".to_string()),
                }
            }
            ColumnKind::Real => {
                let parsed = match v.as_str().map(str::trim) {
                    Some("") => return Ok(Value::Null),
                    Some(s) => s.parse::<f64>().ok(),
                    None => v.as_f64(),
                };
                // NaN and infinities would be stored as NULL.
                match parsed.filter(|f| f.is_finite()) {
                    Some(f) => Ok(Value::Real(f)),
                    None => Err("must be a number".to_string()),
                }
            }
            ColumnKind::Date => match v.as_str().map(str::trim) {
                Some("") => Ok(Value::Null),
                Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
                    .map_err(|_| "must be a date (YYYY-MM-DD)".to_string()),
                None => Err("must be a date (YYYY-MM-DD)".to_string()),
            },
            ColumnKind::Month => match v.as_str().map(str::trim) {
                Some("") => Ok(Value::Null),
                Some(s) => NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d")
                    .map(|d| Value::Text(d.format("%Y-%m").to_string()))
                    .map_err(|_| "must be a month (YYYY-MM)".to_string()),
                None => Err("must be a month (YYYY-MM)".to_string()),
            },
            ColumnKind::Reference(_) => match v.as_str().map(str::trim) {
                Some("") => Ok(Value::Null),
                Some(s) => Ok(Value::Text(s.to_string())),
                None => Err("must be an id string".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_table_name_resolves_back_to_its_kind() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_table(kind.table()), Some(kind));
        }
        assert_eq!(EntityKind::from_table("nope"), None);
    }

    #[test]
    fn every_kind_has_a_required_column() {
        for kind in EntityKind::ALL {
            assert!(
                kind.columns().iter().any(|c| c.required),
                "{} has no required column",
                kind.table()
            );
        }
    }

    #[test]
    fn status_tables_line_up_with_status_columns() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.has_status(), !kind.statuses().is_empty(), "{}", kind.table());
        }
        assert_eq!(EntityKind::Student.default_status(), Some("dang_hoc"));
        assert_eq!(EntityKind::Request.status_label("da_duyet"), Some("Đã duyệt"));
        assert_eq!(EntityKind::Request.status_label("unknown"), None);
        assert_eq!(EntityKind::File.default_status(), None);
    }

    #[test]
    fn coerce_normalizes_dates_and_rejects_garbage() {
        assert_eq!(
            ColumnKind::Date.coerce(&json!("2015-3-7")).unwrap(),
            Value::Text("2015-03-07".into())
        );
        assert_eq!(ColumnKind::Date.coerce(&json!("  ")).unwrap(), Value::Null);
        assert!(ColumnKind::Date.coerce(&json!("07/03/2015")).is_err());
        assert_eq!(
            ColumnKind::Month.coerce(&json!("2024-09")).unwrap(),
            Value::Text("2024-09".into())
        );
        assert!(ColumnKind::Month.coerce(&json!("2024-13")).is_err());
    }

    #[test]
    fn coerce_accepts_numeric_strings() {
        assert_eq!(ColumnKind::Integer.coerce(&json!("12")).unwrap(), Value::Integer(12));
        assert_eq!(ColumnKind::Integer.coerce(&json!(3.0)).unwrap(), Value::Integer(3));
        assert!(ColumnKind::Integer.coerce(&json!(3.5)).is_err());
        assert_eq!(ColumnKind::Real.coerce(&json!("1500000")).unwrap(), Value::Real(1_500_000.0));
        assert!(ColumnKind::Reference(EntityKind::Class).coerce(&json!(5)).is_err());
    }

    #[test]
    fn coerce_rejects_non_finite_and_out_of_range_numbers() {
        for s in ["NaN", "inf", "-inf", "infinity"] {
            assert!(ColumnKind::Real.coerce(&json!(s)).is_err(), "{}", s);
        }
        assert!(ColumnKind::Real.coerce(&json!(true)).is_err());
        assert!(ColumnKind::Integer.coerce(&json!(1e20)).is_err());
        assert!(ColumnKind::Integer.coerce(&json!(-1e20)).is_err());
        assert!(ColumnKind::Integer.coerce(&json!(9_223_372_036_854_775_808.0)).is_err());
        assert_eq!(
            ColumnKind::Integer.coerce(&json!(i64::MIN as f64)).unwrap(),
            Value::Integer(i64::MIN)
        );
    }
}
