//! Coercion of query literals and payload values into column types.

use crate::config::{ColumnDescriptor, ColumnType};
use crate::query::value::SqlValue;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoerceError {
    #[error("value does not parse as the column type")]
    Invalid,
    #[error("empty value for a non-nullable column")]
    NotNullable,
    #[error("column type cannot be inferred")]
    Uninferable,
}

/// Coerce a percent-decoded query literal.
pub fn coerce_literal(column: &ColumnDescriptor, raw: &str) -> Result<SqlValue, CoerceError> {
    let ty = column.column_type;
    if ty == ColumnType::Unknown {
        return Err(CoerceError::Uninferable);
    }
    if ty.is_string() {
        return Ok(SqlValue::Text(raw.to_string()));
    }
    if raw.is_empty() {
        return if column.nullable {
            Ok(SqlValue::Null)
        } else {
            Err(CoerceError::NotNullable)
        };
    }
    Ok(match ty {
        ColumnType::Bool => match raw {
            "true" | "1" => SqlValue::Bool(true),
            "false" | "0" => SqlValue::Bool(false),
            _ => return Err(CoerceError::Invalid),
        },
        ColumnType::Int => SqlValue::Int(raw.parse().map_err(|_| CoerceError::Invalid)?),
        ColumnType::Float => SqlValue::Float(raw.parse().map_err(|_| CoerceError::Invalid)?),
        ColumnType::Decimal => {
            let trimmed = raw.trim();
            trimmed.parse::<f64>().map_err(|_| CoerceError::Invalid)?;
            SqlValue::Decimal(trimmed.to_string())
        }
        ColumnType::Uuid => SqlValue::Uuid(uuid::Uuid::parse_str(raw).map_err(|_| CoerceError::Invalid)?),
        ColumnType::Bytes => SqlValue::Bytes(raw.as_bytes().to_vec()),
        ColumnType::Json => SqlValue::Text(raw.to_string()),
        ColumnType::Duration => {
            let secs: f64 = raw.parse().map_err(|_| CoerceError::Invalid)?;
            SqlValue::Duration(seconds_to_duration(secs).ok_or(CoerceError::Invalid)?)
        }
        ColumnType::Date => match parse_iso_datetime(raw).ok_or(CoerceError::Invalid)? {
            IsoDateTime::Naive(dt) => SqlValue::Date(dt.date()),
            IsoDateTime::Aware(dt) => SqlValue::Date(dt.date_naive()),
        },
        ColumnType::Time => match parse_time(raw) {
            Some(t) => SqlValue::Time(t),
            None => match parse_iso_datetime(raw).ok_or(CoerceError::Invalid)? {
                IsoDateTime::Naive(dt) => SqlValue::Time(dt.time()),
                IsoDateTime::Aware(dt) => SqlValue::Time(dt.time()),
            },
        },
        ColumnType::Timestamp => match parse_iso_datetime(raw).ok_or(CoerceError::Invalid)? {
            IsoDateTime::Naive(dt) => SqlValue::Timestamp(dt),
            IsoDateTime::Aware(dt) => SqlValue::Timestamp(dt.naive_utc()),
        },
        ColumnType::TimestampTz => match parse_iso_datetime(raw).ok_or(CoerceError::Invalid)? {
            IsoDateTime::Naive(dt) => SqlValue::TimestampTz(Utc.from_utc_datetime(&dt).fixed_offset()),
            IsoDateTime::Aware(dt) => SqlValue::TimestampTz(dt),
        },
        ColumnType::Text | ColumnType::Enum | ColumnType::Unknown => {
            return Err(CoerceError::Uninferable)
        }
    })
}

/// Best-effort coercion of a JSON payload value on write. Temporal strings are
/// parsed and numeric durations become intervals; anything else is passed
/// through for the database to cast or reject.
pub fn coerce_payload(
    column: &ColumnDescriptor,
    value: &serde_json::Value,
) -> Result<SqlValue, CoerceError> {
    use serde_json::Value;
    match (column.column_type, value) {
        (_, Value::Null) => Ok(SqlValue::Null),
        (
            ColumnType::Date | ColumnType::Time | ColumnType::Timestamp | ColumnType::TimestampTz,
            Value::String(s),
        ) => coerce_literal(column, s),
        (ColumnType::Duration, Value::Number(n)) => n
            .as_f64()
            .and_then(seconds_to_duration)
            .map(SqlValue::Duration)
            .ok_or(CoerceError::Invalid),
        (ColumnType::Json, v) => Ok(SqlValue::Json(v.clone())),
        (_, v) => Ok(SqlValue::from_json(v)),
    }
}

pub(crate) fn seconds_to_duration(secs: f64) -> Option<chrono::Duration> {
    let micros = (secs * 1_000_000.0).round();
    if !micros.is_finite() || micros.abs() >= i64::MAX as f64 {
        return None;
    }
    Some(chrono::Duration::microseconds(micros as i64))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IsoDateTime {
    Naive(NaiveDateTime),
    Aware(DateTime<FixedOffset>),
}

/// Strict ISO-8601 date or datetime, with optional fraction and offset.
pub fn parse_iso_datetime(raw: &str) -> Option<IsoDateTime> {
    let s = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(IsoDateTime::Naive(d.and_time(NaiveTime::default())));
    }
    let mut s = s.to_string();
    if s.get(10..11) == Some(" ") {
        s.replace_range(10..11, "T");
    }
    if s.ends_with('Z') || s.ends_with('z') {
        s.pop();
        s.push_str("+00:00");
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f%:z",
        "%Y-%m-%dT%H:%M%:z",
        "%Y-%m-%dT%H:%M:%S%.f%z",
        "%Y-%m-%dT%H:%M%z",
    ] {
        if let Ok(dt) = DateTime::parse_from_str(&s, fmt) {
            return Some(IsoDateTime::Aware(dt));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&s, fmt) {
            return Some(IsoDateTime::Naive(dt));
        }
    }
    None
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let s = raw.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// Rough type of a literal, for error messages.
pub fn apparent_type(raw: &str) -> &'static str {
    if raw.is_empty() {
        "empty"
    } else if raw == "true" || raw == "false" {
        "boolean"
    } else if raw.parse::<i64>().is_ok() {
        "integer"
    } else if raw.parse::<f64>().is_ok() {
        "float"
    } else {
        "string"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn column(column_type: ColumnType, nullable: bool) -> ColumnDescriptor {
        ColumnDescriptor {
            key: "c".into(),
            cast_type: "text".into(),
            column_type,
            nullable,
            has_default: false,
            autoincrement: false,
            primary_key: false,
        }
    }

    #[test]
    fn test_bool_accepts_exactly_four_literals() {
        let c = column(ColumnType::Bool, false);
        assert_eq!(coerce_literal(&c, "true"), Ok(SqlValue::Bool(true)));
        assert_eq!(coerce_literal(&c, "1"), Ok(SqlValue::Bool(true)));
        assert_eq!(coerce_literal(&c, "false"), Ok(SqlValue::Bool(false)));
        assert_eq!(coerce_literal(&c, "0"), Ok(SqlValue::Bool(false)));
        assert_eq!(coerce_literal(&c, "yes"), Err(CoerceError::Invalid));
        assert_eq!(coerce_literal(&c, "True"), Err(CoerceError::Invalid));
    }

    #[test]
    fn test_empty_string_depends_on_nullability() {
        assert_eq!(
            coerce_literal(&column(ColumnType::Int, true), ""),
            Ok(SqlValue::Null)
        );
        assert_eq!(
            coerce_literal(&column(ColumnType::Int, false), ""),
            Err(CoerceError::NotNullable)
        );
        assert_eq!(
            coerce_literal(&column(ColumnType::Text, false), ""),
            Ok(SqlValue::Text(String::new()))
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(coerce_literal(&column(ColumnType::Int, true), "42"), Ok(SqlValue::Int(42)));
        assert_eq!(coerce_literal(&column(ColumnType::Int, true), "4.2"), Err(CoerceError::Invalid));
        assert_eq!(
            coerce_literal(&column(ColumnType::Float, true), "4.5"),
            Ok(SqlValue::Float(4.5))
        );
        assert_eq!(
            coerce_literal(&column(ColumnType::Decimal, true), "10.25"),
            Ok(SqlValue::Decimal("10.25".into()))
        );
        assert_eq!(
            coerce_literal(&column(ColumnType::Decimal, true), "ten"),
            Err(CoerceError::Invalid)
        );
    }

    #[test]
    fn test_duration_in_seconds() {
        assert_eq!(
            coerce_literal(&column(ColumnType::Duration, true), "90.5"),
            Ok(SqlValue::Duration(chrono::Duration::milliseconds(90_500)))
        );
        assert_eq!(
            coerce_payload(&column(ColumnType::Duration, true), &json!(3600)),
            Ok(SqlValue::Duration(chrono::Duration::hours(1)))
        );
    }

    #[test]
    fn test_temporal_literals() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(
            coerce_literal(&column(ColumnType::Date, true), "2024-01-31"),
            Ok(SqlValue::Date(date))
        );
        assert_eq!(
            coerce_literal(&column(ColumnType::Date, true), "31/01/2024"),
            Err(CoerceError::Invalid)
        );
        assert_eq!(
            coerce_literal(&column(ColumnType::Time, true), "10:20:30"),
            Ok(SqlValue::Time(NaiveTime::from_hms_opt(10, 20, 30).unwrap()))
        );
        assert_eq!(
            coerce_literal(&column(ColumnType::Time, true), "2024-01-31T08:15:00"),
            Ok(SqlValue::Time(NaiveTime::from_hms_opt(8, 15, 0).unwrap()))
        );
        let ts = coerce_literal(&column(ColumnType::TimestampTz, true), "2024-01-31T10:00:00Z");
        match ts {
            Ok(SqlValue::TimestampTz(dt)) => assert_eq!(dt.to_rfc3339(), "2024-01-31T10:00:00+00:00"),
            other => panic!("unexpected {:?}", other),
        }
        let naive = coerce_literal(&column(ColumnType::Timestamp, true), "2024-01-31 10:00:00.250");
        assert_eq!(
            naive,
            Ok(SqlValue::Timestamp(
                date.and_hms_milli_opt(10, 0, 0, 250).unwrap()
            ))
        );
    }

    #[test]
    fn test_offsets_are_kept() {
        match parse_iso_datetime("2024-05-01T12:00:00+02:00") {
            Some(IsoDateTime::Aware(dt)) => assert_eq!(dt.offset().local_minus_utc(), 7200),
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_iso_datetime("tomorrow").is_none());
    }

    #[test]
    fn test_unknown_type_is_uninferable() {
        assert_eq!(
            coerce_literal(&column(ColumnType::Unknown, true), "x"),
            Err(CoerceError::Uninferable)
        );
    }

    #[test]
    fn test_payload_pass_through() {
        let c = column(ColumnType::Int, true);
        assert_eq!(coerce_payload(&c, &json!("12")), Ok(SqlValue::Text("12".into())));
        assert_eq!(coerce_payload(&c, &json!(null)), Ok(SqlValue::Null));
        let j = column(ColumnType::Json, true);
        assert_eq!(coerce_payload(&j, &json!("s")), Ok(SqlValue::Json(json!("s"))));
        let d = column(ColumnType::Date, true);
        assert_eq!(coerce_payload(&d, &json!("bad")), Err(CoerceError::Invalid));
    }

    #[test]
    fn test_apparent_type() {
        assert_eq!(apparent_type("abc"), "string");
        assert_eq!(apparent_type("12"), "integer");
        assert_eq!(apparent_type("1.5"), "float");
        assert_eq!(apparent_type("true"), "boolean");
        assert_eq!(apparent_type(""), "empty");
    }
}
