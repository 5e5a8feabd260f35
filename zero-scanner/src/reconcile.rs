//! Temporal reconciliation.
//!
//! The only authority on whether a record falls inside the requested
//! window. A scanner's own embedded dates are ignored; every record is
//! re-checked against the caller's `[start, end]`.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use tracing::debug;

use crate::types::ResultRecord;

/// Keys tried, in order, before falling back to any key containing `date`.
pub const DATE_FIELDS: &[&str] = &["date", "datetime", "timestamp", "trade_date", "time", "day"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%Y%m%d"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Integer range read as `YYYYMMDD`.
const COMPACT_DATE_MIN: i64 = 19_000_101;
const COMPACT_DATE_MAX: i64 = 29_991_231;

/// Epoch values above this are taken as milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Output of [`reconcile`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Records inside the window, in their original relative order
    pub records: Vec<ResultRecord>,
    /// Missing or unparseable date
    pub dropped_unparseable: usize,
    pub dropped_out_of_range: usize,
}

impl Reconciliation {
    pub fn kept(&self) -> usize {
        self.records.len()
    }
}

/// Keep records whose date lies in `[start, end]`.
pub fn reconcile(records: Vec<ResultRecord>, start: NaiveDate, end: NaiveDate) -> Reconciliation {
    let mut out = Reconciliation::default();
    let total = records.len();

    for record in records {
        match record_date(&record) {
            Some(date) if start <= date && date <= end => out.records.push(record),
            Some(_) => out.dropped_out_of_range += 1,
            None => out.dropped_unparseable += 1,
        }
    }

    debug!(
        total,
        kept = out.kept(),
        dropped_unparseable = out.dropped_unparseable,
        dropped_out_of_range = out.dropped_out_of_range,
        %start,
        %end,
        "Reconciled records"
    );
    out
}

/// The key holding a record's date, if any.
///
/// Candidates are tried in order and the first whose value parses wins, so
/// a clock-only `time` column does not shadow a later `signal_date`.
pub fn date_field(record: &ResultRecord) -> Option<&str> {
    candidate_fields(record)
        .into_iter()
        .find(|key| record.get(*key).and_then(parse_date_value).is_some())
}

/// The parsed date of a record.
pub fn record_date(record: &ResultRecord) -> Option<NaiveDate> {
    candidate_fields(record)
        .into_iter()
        .find_map(|key| record.get(key).and_then(parse_date_value))
}

/// Keys that may hold a date: [`DATE_FIELDS`] first, then any key containing `date`.
fn candidate_fields(record: &ResultRecord) -> Vec<&str> {
    let mut keys: Vec<&str> = Vec::new();
    for wanted in DATE_FIELDS {
        for key in record.keys().filter(|k| k.eq_ignore_ascii_case(wanted)) {
            if !keys.contains(&key.as_str()) {
                keys.push(key);
            }
        }
    }
    for key in record.keys() {
        if key.to_ascii_lowercase().contains("date") && !keys.contains(&key.as_str()) {
            keys.push(key);
        }
    }
    keys
}

/// Coerce a JSON value to a calendar date.
///
/// Integers in `19000101..=29991231` that form a valid calendar day are
/// read as `YYYYMMDD`; other numbers are epoch seconds or milliseconds.
pub fn parse_date_value(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => parse_date_str(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(from_compact_integer)
            .or_else(|| from_epoch(n.as_f64()?)),
        _ => None,
    }
}

/// Parse the textual date forms scanners commonly emit.
pub fn parse_date_str(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.date());
        }
    }
    // Trailing zone designators that RFC 3339 rejects, e.g. "2025-03-01 00:00:00+00:00"
    if text.len() > 10 && text.is_char_boundary(10) {
        let head = &text[..10];
        if let Ok(date) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
            let rest = &text[10..];
            if rest.starts_with(' ') || rest.starts_with('T') {
                return Some(date);
            }
        }
    }
    None
}

fn from_compact_integer(raw: i64) -> Option<NaiveDate> {
    if !(COMPACT_DATE_MIN..=COMPACT_DATE_MAX).contains(&raw) {
        return None;
    }
    let year = i32::try_from(raw / 10_000).ok()?;
    let month = u32::try_from(raw / 100 % 100).ok()?;
    let day = u32::try_from(raw % 100).ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn from_epoch(raw: f64) -> Option<NaiveDate> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let millis = if raw > EPOCH_MILLIS_THRESHOLD {
        raw as i64
    } else {
        (raw * 1000.0) as i64
    };
    DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}
