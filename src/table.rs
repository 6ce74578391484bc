//! Client-side table view: search, single-column sort and fixed-size pages
//! over an in-memory row array.

use crate::model::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const EMPTY_MESSAGE: &str = "Không có kết quả";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderKind {
    #[default]
    Plain,
    Status,
    Date,
    Currency,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TableColumn {
    pub key: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub sortable: bool,
    #[serde(default)]
    pub render: RenderKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SortState {
    pub key: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortState {
    /// Header click: same column flips direction, a new column starts ascending.
    pub fn toggle(current: Option<&SortState>, key: &str) -> SortState {
        match current {
            Some(s) if s.key == key => SortState {
                key: key.to_string(),
                direction: match s.direction {
                    SortDirection::Asc => SortDirection::Desc,
                    SortDirection::Desc => SortDirection::Asc,
                },
            },
            _ => SortState {
                key: key.to_string(),
                direction: SortDirection::Asc,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRequest {
    #[serde(default)]
    pub columns: Vec<TableColumn>,
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub sort: Option<SortState>,
    /// Header click on this column, applied on top of `sort`.
    #[serde(default)]
    pub toggle_sort: Option<String>,
    /// 1-based; anything below 1 (negatives included) means the first page.
    #[serde(default = "first_page")]
    pub page: i64,
    #[serde(default)]
    pub page_size: Option<usize>,
}

fn first_page() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableResult {
    pub columns: Vec<TableColumn>,
    pub rows: Vec<Value>,
    pub cells: Vec<Vec<String>>,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub total_rows: usize,
    pub sort: Option<SortState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empty_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub rows: Vec<Value>,
    pub page: usize,
    pub total_pages: usize,
}

fn plain_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn render_date(v: &Value) -> String {
    let Some(s) = v.as_str() else {
        return plain_text(v);
    };
    // Accepts plain dates and RFC 3339 timestamps.
    let day = s.get(..10).unwrap_or(s);
    match chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d") {
        Ok(d) => d.format("%d/%m/%Y").to_string(),
        Err(_) => s.to_string(),
    }
}

fn render_currency(v: &Value) -> String {
    let Some(amount) = v
        .as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
    else {
        return plain_text(v);
    };
    let rounded = amount.round() as i64;
    let digits = rounded.unsigned_abs().to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    if rounded < 0 {
        format!("-{} ₫", grouped)
    } else {
        format!("{} ₫", grouped)
    }
}

fn render_status(row: &Value, key: &str, v: &Value, kind: Option<EntityKind>) -> String {
    if let Some(label) = row.get(format!("{}_label", key)).and_then(|l| l.as_str()) {
        return label.to_string();
    }
    match (kind, v.as_str()) {
        (Some(kind), Some(code)) => kind.status_label(code).unwrap_or(code).to_string(),
        _ => plain_text(v),
    }
}

pub fn render_cell(row: &Value, column: &TableColumn, kind: Option<EntityKind>) -> String {
    let v = row.get(&column.key).unwrap_or(&Value::Null);
    match column.render {
        RenderKind::Plain => plain_text(v),
        RenderKind::Date => render_date(v),
        RenderKind::Currency => render_currency(v),
        RenderKind::Status => render_status(row, &column.key, v, kind),
    }
}

fn row_matches(row: &Value, columns: &[TableColumn], kind: Option<EntityKind>, needle: &str) -> bool {
    let Some(obj) = row.as_object() else {
        return plain_text(row).to_lowercase().contains(needle);
    };
    obj.iter().any(|(key, v)| {
        let text = match columns.iter().find(|c| &c.key == key) {
            Some(col) => render_cell(row, col, kind),
            None => plain_text(v),
        };
        text.to_lowercase().contains(needle)
    })
}

/// Rows whose rendered text contains `query`, ignoring case. A blank query keeps everything.
pub fn filter_rows(
    rows: &[Value],
    columns: &[TableColumn],
    kind: Option<EntityKind>,
    query: &str,
) -> Vec<Value> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return rows.to_vec();
    }
    rows.iter()
        .filter(|row| row_matches(row, columns, kind, &needle))
        .cloned()
        .collect()
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x
            .to_lowercase()
            .cmp(&y.to_lowercase())
            .then_with(|| x.cmp(y)),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            a.to_string().cmp(&b.to_string())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Stable sort on one column. Unknown or non-sortable columns leave the order alone.
pub fn sort_rows(rows: &mut [Value], columns: &[TableColumn], sort: &SortState) {
    if !columns.iter().any(|c| c.key == sort.key && c.sortable) {
        return;
    }
    let key = sort.key.as_str();
    rows.sort_by(|a, b| {
        let va = a.get(key).unwrap_or(&Value::Null);
        let vb = b.get(key).unwrap_or(&Value::Null);
        match sort.direction {
            SortDirection::Asc => compare_values(va, vb),
            SortDirection::Desc => compare_values(vb, va),
        }
    });
}

pub fn total_pages(len: usize, page_size: usize) -> usize {
    let size = page_size.max(1);
    len.div_ceil(size).max(1)
}

/// One page of `rows`; `page` is 1-based and clamped to `[1, total_pages]`.
pub fn paginate(rows: &[Value], page_size: usize, page: usize) -> Page {
    let size = page_size.max(1);
    let total = total_pages(rows.len(), size);
    let page = page.clamp(1, total);
    let start = (page - 1) * size;
    let end = (start + size).min(rows.len());
    Page {
        rows: rows.get(start..end).map(|s| s.to_vec()).unwrap_or_default(),
        page,
        total_pages: total,
    }
}

/// Full pipeline: filter, then sort, then page. Non-array data renders as empty.
pub fn query(
    data: &Value,
    req: &TableRequest,
    kind: Option<EntityKind>,
    default_page_size: usize,
) -> TableResult {
    let page_size = req.page_size.unwrap_or(default_page_size).max(1);
    let sort = match &req.toggle_sort {
        Some(key) => Some(SortState::toggle(req.sort.as_ref(), key)),
        None => req.sort.clone(),
    };
    let Some(all) = data.as_array() else {
        return TableResult {
            columns: req.columns.clone(),
            rows: Vec::new(),
            cells: Vec::new(),
            page: 1,
            page_size,
            total_pages: 1,
            total_rows: 0,
            sort,
            empty_message: Some(EMPTY_MESSAGE.to_string()),
        };
    };

    let mut rows = filter_rows(all, &req.columns, kind, &req.search);
    if let Some(sort) = &sort {
        sort_rows(&mut rows, &req.columns, sort);
    }
    let total_rows = rows.len();
    let requested = usize::try_from(req.page.max(1)).unwrap_or(usize::MAX);
    let page = paginate(&rows, page_size, requested);
    let cells = page
        .rows
        .iter()
        .map(|row| {
            req.columns
                .iter()
                .map(|c| render_cell(row, c, kind))
                .collect()
        })
        .collect();

    TableResult {
        columns: req.columns.clone(),
        empty_message: page.rows.is_empty().then(|| EMPTY_MESSAGE.to_string()),
        rows: page.rows,
        cells,
        page: page.page,
        page_size,
        total_pages: page.total_pages,
        total_rows,
        sort,
    }
}
