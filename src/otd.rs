//! On-time-delivery evaluation.
//!
//! Compares an actual date against a commitment date on calendar days only.
//! Anything that does not parse as a date yields `NotApplicable`; nothing here
//! returns an error.

use crate::models::{DerivedFieldRule, OnTimeDelivery, Record, TableSchema};
use chrono::{DateTime, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static YEAR_FIRST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})([-/.])(\d{1,2})([-/.])(\d{1,2})$").expect("valid regex"));
static DAY_FIRST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})([-/.])(\d{1,2})([-/.])(\d{4})$").expect("valid regex"));

/// Parses `YYYY-MM-DD` (also `/` or `.`) and day-first `DD-MM-YYYY`, optionally
/// followed by a time part, which is discarded.
pub fn parse_calendar_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.date_naive());
    }

    let date_part = trimmed
        .split(|ch: char| ch.is_whitespace() || ch == 'T')
        .next()
        .unwrap_or_default();

    if let Some(caps) = YEAR_FIRST.captures(date_part) {
        if caps[2] != caps[4] {
            return None;
        }
        return build_date(&caps[1], &caps[3], &caps[5]);
    }

    if let Some(caps) = DAY_FIRST.captures(date_part) {
        if caps[2] != caps[4] {
            return None;
        }
        return build_date(&caps[5], &caps[3], &caps[1]);
    }

    None
}

fn build_date(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    let year = year.parse::<i32>().ok()?;
    let month = month.parse::<u32>().ok()?;
    let day = day.parse::<u32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

pub fn evaluate(commitment: Option<&str>, actual: Option<&str>) -> OnTimeDelivery {
    let (Some(commitment), Some(actual)) = (
        commitment.and_then(parse_calendar_date),
        actual.and_then(parse_calendar_date),
    ) else {
        return OnTimeDelivery::NotApplicable;
    };

    if actual <= commitment {
        OnTimeDelivery::Ok
    } else {
        OnTimeDelivery::NotOk
    }
}

/// Same as [`evaluate`] for raw row values. Numbers are read as text, so a bare
/// `20240510` does not parse.
pub fn evaluate_values(commitment: Option<&Value>, actual: Option<&Value>) -> OnTimeDelivery {
    let commitment = commitment.and_then(value_as_text);
    let actual = actual.and_then(value_as_text);
    evaluate(commitment.as_deref(), actual.as_deref())
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Overwrites every derived column that applies to `schema` with a fresh
/// evaluation of the record's current dates. Returns the number of columns written.
pub fn apply_derived_fields(record: &mut Record, schema: &TableSchema, rules: &[DerivedFieldRule]) -> usize {
    let mut applied = 0usize;
    for rule in rules.iter().filter(|rule| rule.applies_to(schema)) {
        let outcome = evaluate_values(record.get(&rule.commitment), record.get(&rule.actual));
        record.insert(rule.target.clone(), Value::String(outcome.as_str().to_string()));
        applied += 1;
    }
    applied
}
