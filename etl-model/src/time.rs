//! FILENAME: etl-model/src/time.rs
//! PURPOSE: Time descriptors for measurement-time fields and span derivation.
//! CONTEXT: A measurement-time field maps its raw level values onto integer
//! bucket indices. The mapping is fixed by a reference (a raw value known to
//! sit at a given index) and an interval (unit + count). Spans are derived
//! only when a format, a unit and a count are all known; otherwise the field
//! keeps an empty span list until the user completes the descriptor.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{EtlError, EtlResult};
use crate::field::Level;
use crate::logging::log_debug;
use crate::span::{consolidate_spans, Span};

// ============================================================================
// DESCRIPTOR TYPES
// ============================================================================

/// Unit of one time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntervalUnit {
    #[serde(rename = "Y")]
    Year,
    #[serde(rename = "Q")]
    Quarter,
    #[serde(rename = "M")]
    Month,
    #[serde(rename = "W")]
    Week,
    #[serde(rename = "D")]
    Day,
}

impl IntervalUnit {
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "Y" | "YEAR" => Some(IntervalUnit::Year),
            "Q" | "QUARTER" => Some(IntervalUnit::Quarter),
            "M" | "MONTH" => Some(IntervalUnit::Month),
            "W" | "WEEK" => Some(IntervalUnit::Week),
            "D" | "DAY" => Some(IntervalUnit::Day),
            _ => None,
        }
    }

    /// Whole units from `from` to `to` (negative when `to` is earlier).
    fn periods_between(&self, from: NaiveDate, to: NaiveDate) -> i64 {
        let months = |d: NaiveDate| d.year() as i64 * 12 + d.month0() as i64;
        match self {
            IntervalUnit::Year => (to.year() - from.year()) as i64,
            IntervalUnit::Quarter => (months(to) / 3) - (months(from) / 3),
            IntervalUnit::Month => months(to) - months(from),
            IntervalUnit::Week => (to - from).num_days().div_euclid(7),
            IntervalUnit::Day => (to - from).num_days(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub unit: Option<IntervalUnit>,
    pub count: Option<u32>,
}

impl Interval {
    pub fn new(unit: IntervalUnit, count: u32) -> Self {
        Interval {
            unit: Some(unit),
            count: Some(count),
        }
    }

    /// Unit and a non-zero count, when both are set.
    pub fn resolved(&self) -> Option<(IntervalUnit, u32)> {
        match (self.unit, self.count) {
            (Some(unit), Some(count)) if count > 0 => Some((unit, count)),
            _ => None,
        }
    }
}

/// A raw value known to sit at bucket `idx`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeReference {
    pub idx: i64,
    pub value: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeDescriptor {
    pub reference: TimeReference,
    pub interval: Interval,
}

impl TimeDescriptor {
    pub fn new(interval: Interval) -> Self {
        TimeDescriptor {
            reference: TimeReference::default(),
            interval,
        }
    }

    /// The reference value parsed with the reference format, or `fallback_format`.
    pub fn reference_date(&self, fallback_format: Option<&str>) -> Option<NaiveDate> {
        let value = self.reference.value.as_deref()?;
        let format = self.reference.format.as_deref().or(fallback_format)?;
        parse_date(value, format)
    }

    /// Bucket index of `date` under this descriptor.
    pub fn bucket_of(&self, date: NaiveDate, fallback_format: Option<&str>) -> Option<i64> {
        let (unit, count) = self.interval.resolved()?;
        let reference = self.reference_date(fallback_format)?;
        Some(self.reference.idx + unit.periods_between(reference, date).div_euclid(count as i64))
    }
}

// ============================================================================
// DATE PARSING
// ============================================================================

/// Translates `YYYY-MM-DD` style tokens into strftime specifiers.
/// Formats already containing `%` are returned unchanged.
pub fn normalize_format(format: &str) -> String {
    if format.contains('%') {
        return format.to_string();
    }
    format
        .replace("YYYY", "%Y")
        .replace("YY", "%y")
        .replace("MM", "%m")
        .replace("DD", "%d")
}

/// Parses a raw level value as a date.
///
/// Formats without a day (or without a month) are completed with the first
/// day of the month (or year), so `2024-03` under `%Y-%m` is 2024-03-01.
pub fn parse_date(value: &str, format: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let format = normalize_format(format);

    if let Ok(date) = NaiveDate::parse_from_str(value, &format) {
        return Some(date);
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(value, &format) {
        return Some(datetime.date());
    }

    let has_day = ["%d", "%e", "%j"].iter().any(|t| format.contains(t));
    if has_day {
        return None;
    }
    let has_month = ["%m", "%b", "%B"].iter().any(|t| format.contains(t));
    if has_month {
        NaiveDate::parse_from_str(&format!("{}|01", value), &format!("{}|%d", format)).ok()
    } else {
        NaiveDate::parse_from_str(&format!("{}|01|01", value), &format!("{}|%m|%d", format)).ok()
    }
}

// ============================================================================
// SPAN DERIVATION
// ============================================================================

/// Result of a successful span derivation.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedSpans {
    pub spans: Vec<Span>,
    /// The descriptor with its reference filled in when it was empty.
    pub time: TimeDescriptor,
}

/// Derives coverage spans from raw `[value, count]` levels.
///
/// Fails with `MissingField` when the format or the interval is incomplete.
/// Values equal to `null_value`, empty values and values that do not parse
/// are skipped.
pub fn derive_spans(
    levels: &[Level],
    null_value: Option<&str>,
    format: Option<&str>,
    time: &TimeDescriptor,
) -> EtlResult<DerivedSpans> {
    let format = format.ok_or_else(|| EtlError::MissingField("format".into()))?;
    if time.interval.resolved().is_none() {
        return Err(EtlError::MissingField("time.interval".into()));
    }

    let mut dated: Vec<(NaiveDate, &str)> = Vec::with_capacity(levels.len());
    for level in levels {
        let raw = level.value();
        if raw.trim().is_empty() || Some(raw) == null_value {
            continue;
        }
        match parse_date(raw, format) {
            Some(date) => dated.push((date, raw)),
            None => log_debug!("SPAN", "value {:?} does not match format {:?}", raw, format),
        }
    }

    let mut time = time.clone();
    if time.reference_date(Some(format)).is_none() {
        if let Some((_, raw)) = dated.iter().min_by_key(|(date, _)| *date) {
            time.reference = TimeReference {
                idx: 0,
                value: Some(raw.to_string()),
                format: Some(format.to_string()),
            };
        }
    }

    let mut buckets = BTreeSet::new();
    for (date, _) in &dated {
        if let Some(bucket) = time.bucket_of(*date, Some(format)) {
            buckets.insert(bucket);
        }
    }
    let unit_spans: Vec<Span> = buckets.into_iter().map(|b| Span::new(b, 1)).collect();
    Ok(DerivedSpans {
        spans: consolidate_spans(&unit_spans)?,
        time,
    })
}

/// Re-expresses spans measured against `from` relative to `to`.
///
/// Both references must resolve to dates and `from` must carry a complete
/// interval; otherwise `None` is returned.
pub fn rebase_spans(
    spans: &[Span],
    from: &TimeDescriptor,
    to: &TimeReference,
    fallback_format: Option<&str>,
) -> Option<Vec<Span>> {
    let delta = rebase_delta(from, to, fallback_format)?;
    Some(spans.iter().map(|s| s.shifted(delta)).collect())
}

/// Bucket shift that moves indices measured against `from` onto `to`.
pub fn rebase_delta(
    from: &TimeDescriptor,
    to: &TimeReference,
    fallback_format: Option<&str>,
) -> Option<i64> {
    let from_date = from.reference_date(fallback_format)?;
    let target = TimeDescriptor {
        reference: to.clone(),
        interval: from.interval.clone(),
    };
    let from_idx_in_target = target.bucket_of(from_date, fallback_format)?;
    Some(from_idx_in_target - from.reference.idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(values: &[&str]) -> Vec<Level> {
        values.iter().map(|v| Level::new(*v, 1)).collect()
    }

    fn monthly() -> TimeDescriptor {
        TimeDescriptor::new(Interval::new(IntervalUnit::Month, 1))
    }

    #[test]
    fn test_parse_date_completes_missing_parts() {
        assert_eq!(parse_date("2024-03", "%Y-%m"), NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(parse_date("2021", "%Y"), NaiveDate::from_ymd_opt(2021, 1, 1));
        assert_eq!(parse_date("2024-03-15", "YYYY-MM-DD"), NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(parse_date("garbage", "%Y-%m"), None);
    }

    #[test]
    fn test_derive_monthly_spans() {
        let derived = derive_spans(
            &levels(&["2024-01", "2024-02", "2024-04", "NA"]),
            Some("NA"),
            Some("%Y-%m"),
            &monthly(),
        )
        .unwrap();

        assert_eq!(derived.spans, vec![Span::new(0, 2), Span::new(3, 1)]);
        assert_eq!(derived.time.reference.value.as_deref(), Some("2024-01"));
        assert_eq!(derived.time.reference.idx, 0);
    }

    #[test]
    fn test_derive_requires_format_and_interval() {
        let lv = levels(&["2024-01"]);
        assert!(matches!(
            derive_spans(&lv, None, None, &monthly()),
            Err(EtlError::MissingField(_))
        ));
        assert!(matches!(
            derive_spans(&lv, None, Some("%Y-%m"), &TimeDescriptor::default()),
            Err(EtlError::MissingField(_))
        ));
    }

    #[test]
    fn test_derive_honours_existing_reference() {
        let mut time = monthly();
        time.reference = TimeReference {
            idx: 10,
            value: Some("2023-12".into()),
            format: Some("%Y-%m".into()),
        };
        let derived = derive_spans(&levels(&["2024-01"]), None, Some("%Y-%m"), &time).unwrap();
        assert_eq!(derived.spans, vec![Span::new(11, 1)]);
    }

    #[test]
    fn test_quarterly_and_weekly_buckets() {
        let quarterly = TimeDescriptor::new(Interval::new(IntervalUnit::Quarter, 1));
        let derived = derive_spans(
            &levels(&["2024-01-15", "2024-03-30", "2024-07-01"]),
            None,
            Some("%Y-%m-%d"),
            &quarterly,
        )
        .unwrap();
        assert_eq!(derived.spans, vec![Span::new(0, 1), Span::new(2, 1)]);

        let biweekly = TimeDescriptor::new(Interval::new(IntervalUnit::Week, 2));
        let derived = derive_spans(
            &levels(&["2024-01-01", "2024-01-10", "2024-01-15"]),
            None,
            Some("%Y-%m-%d"),
            &biweekly,
        )
        .unwrap();
        assert_eq!(derived.spans, vec![Span::new(0, 2)]);
    }

    #[test]
    fn test_rebase_spans() {
        let mut from = monthly();
        from.reference = TimeReference {
            idx: 0,
            value: Some("2024-03".into()),
            format: Some("%Y-%m".into()),
        };
        let to = TimeReference {
            idx: 0,
            value: Some("2024-01".into()),
            format: Some("%Y-%m".into()),
        };
        let rebased = rebase_spans(&[Span::new(0, 2)], &from, &to, None).unwrap();
        assert_eq!(rebased, vec![Span::new(2, 2)]);

        let unresolved = TimeReference::default();
        assert!(rebase_spans(&[Span::new(0, 1)], &from, &unresolved, None).is_none());
    }
}
