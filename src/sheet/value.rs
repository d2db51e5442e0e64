use chrono::NaiveDate;

/// Label offered for empty cells in value menus and matched against by filters.
pub const BLANK_LABEL: &str = "(Blank)";

const ISO_DATE: &str = "%Y-%m-%d";
const SHORT_DATE: &str = "%d/%m/%Y";

/// A single typed cell as delivered by the data source.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Null,
    Text(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDate),
}

impl CellValue {
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Text shown in grid cells and written to exports. Blank cells stay empty.
    pub fn display(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Bool(b) => yes_no(*b).to_string(),
            CellValue::Date(d) => d.format(ISO_DATE).to_string(),
        }
    }

    /// Short date form used when sizing columns.
    pub fn short_display(&self) -> String {
        match self {
            CellValue::Date(d) => d.format(SHORT_DATE).to_string(),
            other => other.display(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Number(n as f64)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(d: NaiveDate) -> Self {
        CellValue::Date(d)
    }
}

/// Canonical string for a cell. Both the value menu and the column filter
/// predicate go through this, so a candidate picked in the menu always
/// matches the rows it was counted from.
pub fn normalize(value: &CellValue) -> String {
    if value.is_blank() {
        return BLANK_LABEL.to_string();
    }
    value.display()
}

pub fn yes_no(b: bool) -> &'static str {
    if b { "Yes" } else { "No" }
}

pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    // Datetime columns arrive as "YYYY-MM-DD hh:mm:ss"; only the date part is kept.
    let head = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(head, ISO_DATE).ok()
}
