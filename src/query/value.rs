//! Typed values bound to statements and decoded from rows.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::{Database, Type};

/// One column value. Decimals stay textual so no precision is lost between the
/// database and the serializer.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(String),
    Text(String),
    Uuid(uuid::Uuid),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Duration(chrono::Duration),
    Json(serde_json::Value),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Untyped pass-through of a JSON payload value.
    pub fn from_json(v: &serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => SqlValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => SqlValue::Json(v.clone()),
        }
    }

    /// Stable textual form used to match join keys across rows.
    pub fn key_repr(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Bool(b) => b.to_string(),
            SqlValue::Int(n) => n.to_string(),
            SqlValue::Float(f) => f.to_string(),
            SqlValue::Decimal(s) | SqlValue::Text(s) => s.clone(),
            SqlValue::Uuid(u) => u.to_string(),
            SqlValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            SqlValue::Date(d) => d.to_string(),
            SqlValue::Time(t) => t.to_string(),
            SqlValue::Timestamp(t) => t.to_string(),
            SqlValue::TimestampTz(t) => t.to_rfc3339(),
            SqlValue::Duration(d) => d.to_string(),
            SqlValue::Json(v) => v.to_string(),
        }
    }
}

impl<'q> Encode<'q, Postgres> for SqlValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match self {
            SqlValue::Null => <Option<String> as Encode<Postgres>>::encode_by_ref(&None, buf),
            SqlValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf),
            SqlValue::Int(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf),
            SqlValue::Float(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf),
            SqlValue::Decimal(s) | SqlValue::Text(s) => {
                <String as Encode<Postgres>>::encode_by_ref(s, buf)
            }
            SqlValue::Uuid(u) => <uuid::Uuid as Encode<Postgres>>::encode_by_ref(u, buf),
            SqlValue::Bytes(b) => <Vec<u8> as Encode<Postgres>>::encode_by_ref(b, buf),
            SqlValue::Date(d) => <NaiveDate as Encode<Postgres>>::encode_by_ref(d, buf),
            SqlValue::Time(t) => <NaiveTime as Encode<Postgres>>::encode_by_ref(t, buf),
            SqlValue::Timestamp(t) => <NaiveDateTime as Encode<Postgres>>::encode_by_ref(t, buf),
            SqlValue::TimestampTz(t) => {
                <DateTime<FixedOffset> as Encode<Postgres>>::encode_by_ref(t, buf)
            }
            SqlValue::Duration(d) => <chrono::Duration as Encode<Postgres>>::encode_by_ref(d, buf),
            SqlValue::Json(v) => <serde_json::Value as Encode<Postgres>>::encode_by_ref(v, buf),
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            SqlValue::Null | SqlValue::Decimal(_) | SqlValue::Text(_) => {
                <String as Type<Postgres>>::type_info()
            }
            SqlValue::Bool(_) => <bool as Type<Postgres>>::type_info(),
            SqlValue::Int(_) => <i64 as Type<Postgres>>::type_info(),
            SqlValue::Float(_) => <f64 as Type<Postgres>>::type_info(),
            SqlValue::Uuid(_) => <uuid::Uuid as Type<Postgres>>::type_info(),
            SqlValue::Bytes(_) => <Vec<u8> as Type<Postgres>>::type_info(),
            SqlValue::Date(_) => <NaiveDate as Type<Postgres>>::type_info(),
            SqlValue::Time(_) => <NaiveTime as Type<Postgres>>::type_info(),
            SqlValue::Timestamp(_) => <NaiveDateTime as Type<Postgres>>::type_info(),
            SqlValue::TimestampTz(_) => <DateTime<FixedOffset> as Type<Postgres>>::type_info(),
            SqlValue::Duration(_) => <chrono::Duration as Type<Postgres>>::type_info(),
            SqlValue::Json(_) => <serde_json::Value as Type<Postgres>>::type_info(),
        })
    }
}

impl Type<Postgres> for SqlValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_pass_through() {
        assert_eq!(SqlValue::from_json(&json!(null)), SqlValue::Null);
        assert_eq!(SqlValue::from_json(&json!(7)), SqlValue::Int(7));
        assert_eq!(SqlValue::from_json(&json!(1.5)), SqlValue::Float(1.5));
        assert_eq!(SqlValue::from_json(&json!("x")), SqlValue::Text("x".into()));
        assert_eq!(
            SqlValue::from_json(&json!({"a": 1})),
            SqlValue::Json(json!({"a": 1}))
        );
    }

    #[test]
    fn test_key_repr_matches_across_widths() {
        assert_eq!(SqlValue::Int(5).key_repr(), "5");
        let u = uuid::Uuid::nil();
        assert_eq!(SqlValue::Uuid(u).key_repr(), u.to_string());
    }
}
