//! Reporting-period headers
//!
//! Financial report columns are headed by the period they cover, usually
//! with a currency annotation: `"USD ($) Dec. 31, 2020"`. Periods are stored
//! as YYYYMMDD integers.

use chrono::{Datelike, NaiveDate};

/// Annotation prefixed to the first value column of a statement
pub const CURRENCY_ANNOTATION: &str = "USD ($)";

/// Formats tried in order after [`normalize`] has run
const PERIOD_FORMATS: &[&str] = &[
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%B %d %Y",
    "%d %b %Y",
    "%d %B %Y",
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%Y/%m/%d",
];

/// Header text with the currency annotation removed, trimmed.
///
/// `None` when nothing is left.
pub fn clean_header(header: &str) -> Option<String> {
    let cleaned = header.replace(CURRENCY_ANNOTATION, "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Drop abbreviation dots, spell "Sept" as "Sep", collapse whitespace.
fn normalize(header: &str) -> String {
    header
        .replace(CURRENCY_ANNOTATION, "")
        .replace('.', "")
        .split_whitespace()
        .map(|token| match token {
            "Sept" => "Sep",
            "Sept," => "Sep,",
            other => other,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a column header into the calendar date it names.
pub fn parse_period(header: &str) -> Option<NaiveDate> {
    let normalized = normalize(header);

    if normalized.len() == 8 && normalized.bytes().all(|b| b.is_ascii_digit()) {
        let year = normalized[..4].parse().ok()?;
        let month = normalized[4..6].parse().ok()?;
        let day = normalized[6..].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    PERIOD_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&normalized, format).ok())
}

/// Date as a YYYYMMDD integer, e.g. 20201231
pub fn period_key(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 10_000 + i64::from(date.month()) * 100 + i64::from(date.day())
}
