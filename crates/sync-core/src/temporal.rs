//! Temporal value normalization.
//!
//! The change-capture subsystem is configured to emit timestamps as ISO-8601
//! strings, which the replica accepts natively. Some fields still arrive as
//! epoch numbers, with the unit (microseconds or milliseconds) depending on
//! the column's declared precision. The unit is not carried in the message,
//! so it is inferred from the value:
//!
//! - text passes through unchanged
//! - `0` passes through unchanged (unset / epoch sentinel)
//! - any other number is read as microseconds since the epoch; if that lands
//!   in the years 2000..=2100 it is accepted, otherwise the same number is
//!   re-read as milliseconds since the epoch

use crate::values::Value;
use chrono::{DateTime, Datelike, SecondsFormat, Utc};

/// Earliest calendar year accepted for the microsecond interpretation.
pub const MIN_MICROS_YEAR: i32 = 2000;
/// Latest calendar year accepted for the microsecond interpretation.
pub const MAX_MICROS_YEAR: i32 = 2100;

/// Unit a numeric temporal value was interpreted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochUnit {
    Micros,
    Millis,
}

/// Result of normalizing one temporal column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// Written as received.
    Unchanged(Value),
    /// Epoch number converted to an instant.
    Converted { at: DateTime<Utc>, unit: EpochUnit },
}

impl Normalized {
    /// The value to write: converted instants become RFC 3339 text with
    /// microsecond precision.
    pub fn into_value(self) -> Value {
        match self {
            Self::Unchanged(value) => value,
            Self::Converted { at, .. } => {
                Value::Text(at.to_rfc3339_opts(SecondsFormat::Micros, true))
            }
        }
    }
}

/// Interpret a non-zero epoch number, microseconds first.
///
/// Returns `None` when neither interpretation is representable.
pub fn interpret_epoch(raw: i64) -> Option<(DateTime<Utc>, EpochUnit)> {
    if let Some(at) = DateTime::from_timestamp_micros(raw) {
        if (MIN_MICROS_YEAR..=MAX_MICROS_YEAR).contains(&at.year()) {
            return Some((at, EpochUnit::Micros));
        }
    }
    DateTime::from_timestamp_millis(raw).map(|at| (at, EpochUnit::Millis))
}

/// Normalize a value read from a temporal column.
///
/// Fractional numbers are truncated toward zero before interpretation.
pub fn normalize_temporal(value: Value) -> Normalized {
    let raw = match &value {
        Value::Number(_) => value.as_i64(),
        Value::Null | Value::Bool(_) | Value::Text(_) => None,
    };

    match raw {
        Some(0) | None => Normalized::Unchanged(value),
        Some(raw) => match interpret_epoch(raw) {
            Some((at, unit)) => Normalized::Converted { at, unit },
            None => Normalized::Unchanged(value),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_microsecond_value_takes_micros_path() {
        let normalized = normalize_temporal(Value::from(json!(1_700_000_000_000_000i64)));
        match normalized {
            Normalized::Converted { at, unit } => {
                assert_eq!(unit, EpochUnit::Micros);
                assert_eq!(at, Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap());
            }
            other => panic!("expected conversion, got {other:?}"),
        }
    }

    #[test]
    fn test_millisecond_value_falls_back_to_millis() {
        // As microseconds this is January 1970, outside the accepted range
        let normalized = normalize_temporal(Value::from(json!(1_700_000_000_000i64)));
        match normalized {
            Normalized::Converted { at, unit } => {
                assert_eq!(unit, EpochUnit::Millis);
                assert_eq!(at.year(), 2023);
                assert_eq!(at, Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap());
            }
            other => panic!("expected conversion, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_is_a_sentinel() {
        assert_eq!(
            normalize_temporal(Value::from(0)),
            Normalized::Unchanged(Value::from(0))
        );
    }

    #[test]
    fn test_text_and_null_pass_through() {
        let iso = Value::from("2026-02-16T21:04:46.955Z");
        assert_eq!(
            normalize_temporal(iso.clone()),
            Normalized::Unchanged(iso)
        );
        assert_eq!(
            normalize_temporal(Value::Null),
            Normalized::Unchanged(Value::Null)
        );
        assert_eq!(
            normalize_temporal(Value::Bool(true)),
            Normalized::Unchanged(Value::Bool(true))
        );
    }

    #[test]
    fn test_year_range_boundaries() {
        let start_2000 = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let micros = start_2000.timestamp_micros();
        assert_eq!(
            interpret_epoch(micros),
            Some((start_2000, EpochUnit::Micros))
        );

        // One microsecond earlier is 1999 and gets re-read as milliseconds
        let (_, unit) = interpret_epoch(micros - 1).unwrap();
        assert_eq!(unit, EpochUnit::Millis);

        let end_2100 = Utc.with_ymd_and_hms(2100, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(
            interpret_epoch(end_2100.timestamp_micros()),
            Some((end_2100, EpochUnit::Micros))
        );
    }

    #[test]
    fn test_fractional_numbers_are_truncated() {
        let normalized = normalize_temporal(Value::from(json!(1_700_000_000_000.9)));
        assert!(matches!(
            normalized,
            Normalized::Converted {
                unit: EpochUnit::Millis,
                ..
            }
        ));
    }

    #[test]
    fn test_converted_value_is_rfc3339_text() {
        let value = normalize_temporal(Value::from(json!(1_700_000_000_123_456i64))).into_value();
        assert_eq!(value, Value::from("2023-11-14T22:13:20.123456Z"));
    }

    #[test]
    fn test_unrepresentable_number_is_unchanged() {
        let huge = Value::from(json!(i64::MAX));
        assert_eq!(normalize_temporal(huge.clone()), Normalized::Unchanged(huge));
    }
}
