use crate::schema::CellValue;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Outcome of parsing one cell into a typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum CellParse<T> {
    /// Empty cell; the field is left out without an issue.
    Blank,
    Parsed(T),
    /// Non-empty cell that could not be understood.
    Invalid,
}

/// Strips accents, lowercases and collapses every run of non-alphanumeric
/// characters into a single space.
pub fn fold_text(value: &str) -> String {
    let stripped: String = value
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keeps only ASCII digits. Idempotent.
pub fn normalize_account(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Renders a cell as trimmed text. Integral numbers lose their `.0`.
pub fn cell_to_text(cell: &CellValue) -> String {
    match cell {
        CellValue::Empty => String::new(),
        CellValue::Text(s) => s.trim().to_string(),
        CellValue::Number(n) => format_number(*n),
        CellValue::Bool(b) => b.to_string(),
        CellValue::Date(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Parses Brazilian (`1.234,56`) or international (`1,234.56`) notation.
///
/// When both separators occur the rightmost one is the decimal point. A lone
/// comma is a decimal comma. A separator repeated with no other separator
/// present is treated as a thousands separator (`1.234.567`).
pub fn parse_decimal(value: &str) -> Option<f64> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    let mut body = compact.as_str();
    for prefix in ["R$", "US$", "$"] {
        if let Some(rest) = body.strip_prefix(prefix) {
            body = rest;
            break;
        }
    }
    let body = body.strip_suffix('%').unwrap_or(body);

    let (negative, digits) = match body.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, body),
    };

    if !digits.chars().any(|c| c.is_ascii_digit())
        || !digits
            .chars()
            .all(|c| c.is_ascii_digit() || c == ',' || c == '.')
    {
        return None;
    }

    let commas = digits.matches(',').count();
    let dots = digits.matches('.').count();

    let canonical = match (digits.rfind(','), digits.rfind('.')) {
        (Some(comma), Some(dot)) => {
            if comma > dot {
                digits.replace('.', "").replace(',', ".")
            } else {
                digits.replace(',', "")
            }
        }
        (Some(_), None) if commas == 1 => digits.replace(',', "."),
        (Some(_), None) => digits.replace(',', ""),
        (None, Some(_)) if dots > 1 => digits.replace('.', ""),
        _ => digits.to_string(),
    };

    let parsed = canonical.parse::<f64>().ok().filter(|n| n.is_finite())?;
    Some(if negative { -parsed } else { parsed })
}

pub fn cell_to_number(cell: &CellValue) -> CellParse<f64> {
    if cell.is_blank() {
        return CellParse::Blank;
    }
    match cell {
        CellValue::Number(n) if n.is_finite() => CellParse::Parsed(*n),
        CellValue::Number(_) => CellParse::Invalid,
        CellValue::Text(s) => match parse_decimal(s) {
            Some(n) => CellParse::Parsed(n),
            None => CellParse::Invalid,
        },
        _ => CellParse::Invalid,
    }
}

const TRUE_WORDS: [&str; 6] = ["sim", "s", "yes", "y", "true", "1"];
const FALSE_WORDS: [&str; 5] = ["nao", "n", "no", "false", "0"];

pub fn parse_bool_text(value: &str) -> Option<bool> {
    let folded = fold_text(value);
    if TRUE_WORDS.contains(&folded.as_str()) {
        Some(true)
    } else if FALSE_WORDS.contains(&folded.as_str()) {
        Some(false)
    } else {
        None
    }
}

pub fn cell_to_bool(cell: &CellValue) -> CellParse<bool> {
    if cell.is_blank() {
        return CellParse::Blank;
    }
    match cell {
        CellValue::Bool(b) => CellParse::Parsed(*b),
        CellValue::Number(n) if *n == 1.0 => CellParse::Parsed(true),
        CellValue::Number(n) if *n == 0.0 => CellParse::Parsed(false),
        CellValue::Text(s) => match parse_bool_text(s) {
            Some(b) => CellParse::Parsed(b),
            None => CellParse::Invalid,
        },
        _ => CellParse::Invalid,
    }
}

/// Converts a spreadsheet serial date (days since 1899-12-30, UTC).
pub fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial <= 0.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    epoch.checked_add_signed(Duration::try_milliseconds(millis)?)
}

const BR_DATETIME_FORMATS: [&str; 2] = ["%d/%m/%Y %H:%M:%S", "%d/%m/%Y %H:%M"];
const ISO_DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"];

/// Accepts `dd/mm/yyyy[ hh:mm[:ss]]` or an ISO-8601 date/datetime.
pub fn parse_date_text(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();

    for format in BR_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%d/%m/%Y") {
        return date.and_hms_opt(0, 0, 0);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    for format in ISO_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

pub fn cell_to_datetime(cell: &CellValue) -> CellParse<NaiveDateTime> {
    if cell.is_blank() {
        return CellParse::Blank;
    }
    let parsed = match cell {
        CellValue::Date(dt) => Some(*dt),
        CellValue::Number(n) => serial_to_datetime(*n),
        CellValue::Text(s) => parse_date_text(s),
        CellValue::Bool(_) | CellValue::Empty => None,
    };

    match parsed {
        Some(dt) => CellParse::Parsed(dt),
        None => CellParse::Invalid,
    }
}
