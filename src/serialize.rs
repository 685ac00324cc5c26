//! Loaded rows and their JSON rendering.

use crate::config::{Cardinality, Resource};
use crate::error::AppError;
use crate::query::value::SqlValue;
use chrono::{SecondsFormat, Timelike};
use serde_json::{Map, Number, Value};

/// One entity row with whatever relationships were loaded for it.
#[derive(Clone, Debug)]
pub struct Record {
    pub resource: Resource,
    /// Aligned with `resource.columns()`.
    pub values: Vec<SqlValue>,
    pub related: Vec<(String, Related)>,
}

#[derive(Clone, Debug)]
pub enum Related {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

/// Resource name plus primary key (all columns when there is none).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RecordIdentity {
    resource: String,
    key: Vec<String>,
}

impl Record {
    pub fn new(resource: Resource, values: Vec<SqlValue>) -> Self {
        Record {
            resource,
            values,
            related: Vec::new(),
        }
    }

    pub fn value(&self, key: &str) -> Option<&SqlValue> {
        let i = self.resource.descriptor().column_index(key)?;
        self.values.get(i)
    }

    pub fn identity(&self) -> RecordIdentity {
        let columns = self.resource.columns();
        let mut key: Vec<String> = columns
            .iter()
            .zip(&self.values)
            .filter(|(c, _)| c.primary_key)
            .map(|(_, v)| v.key_repr())
            .collect();
        if key.is_empty() {
            key = self.values.iter().map(SqlValue::key_repr).collect();
        }
        RecordIdentity {
            resource: self.resource.name().to_string(),
            key,
        }
    }

    fn related(&self, key: &str) -> Option<&Related> {
        self.related.iter().find(|(k, _)| k == key).map(|(_, r)| r)
    }
}

/// One position of a tuple-shaped row.
#[derive(Clone, Debug)]
pub enum TupleCell {
    Value(SqlValue),
    Entity(Record),
}

fn encoding_error(what: impl std::fmt::Display) -> AppError {
    AppError::ResponseEncoding(what.to_string())
}

fn float(f: f64) -> Result<Value, AppError> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| encoding_error(format!("non-finite float {}", f)))
}

/// Seconds carry six fractional digits, or none when whole.
fn fraction(nanos: u32) -> &'static str {
    if nanos == 0 {
        ""
    } else {
        "%.6f"
    }
}

pub fn serialize_value(v: &SqlValue) -> Result<Value, AppError> {
    Ok(match v {
        SqlValue::Null => Value::Null,
        SqlValue::Bool(b) => Value::Bool(*b),
        SqlValue::Int(n) => Value::Number((*n).into()),
        SqlValue::Float(f) => float(*f)?,
        SqlValue::Decimal(s) => float(
            s.parse::<f64>()
                .map_err(|_| encoding_error(format!("decimal '{}'", s)))?,
        )?,
        SqlValue::Text(s) => Value::String(s.clone()),
        SqlValue::Uuid(u) => Value::String(u.to_string()),
        SqlValue::Bytes(b) => Value::String(
            String::from_utf8(b.clone()).map_err(|e| encoding_error(format!("bytes: {}", e)))?,
        ),
        SqlValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        SqlValue::Time(t) => {
            Value::String(t.format(&format!("%H:%M:%S{}", fraction(t.nanosecond()))).to_string())
        }
        SqlValue::Timestamp(t) => Value::String(
            t.format(&format!("%Y-%m-%dT%H:%M:%S{}", fraction(t.nanosecond())))
                .to_string(),
        ),
        SqlValue::TimestampTz(t) => {
            let precision = if t.nanosecond() == 0 {
                SecondsFormat::Secs
            } else {
                SecondsFormat::Micros
            };
            Value::String(t.to_rfc3339_opts(precision, false))
        }
        SqlValue::Duration(d) => {
            let secs = match d.num_microseconds() {
                Some(us) => us as f64 / 1_000_000.0,
                None => d.num_milliseconds() as f64 / 1_000.0,
            };
            float(secs)?
        }
        SqlValue::Json(j) => j.clone(),
    })
}

/// Serialize a record. `visited` holds the identities of the records being
/// serialized above this one: a to-one back-reference to any of them becomes
/// null and to-many back-references are left out.
pub fn serialize_record(record: &Record, visited: &mut Vec<RecordIdentity>) -> Result<Value, AppError> {
    let mut map = Map::new();
    for (column, value) in record.resource.columns().iter().zip(&record.values) {
        map.insert(column.key.clone(), serialize_value(value)?);
    }

    visited.push(record.identity());
    if let Some(relationships) = record.resource.relationships() {
        for relationship in relationships {
            let value = match record.related(&relationship.key) {
                Some(Related::One(Some(child))) => {
                    if visited.contains(&child.identity()) {
                        Value::Null
                    } else {
                        serialize_record(child, visited)?
                    }
                }
                Some(Related::Many(children)) => {
                    let mut out = Vec::with_capacity(children.len());
                    for child in children {
                        if !visited.contains(&child.identity()) {
                            out.push(serialize_record(child, visited)?);
                        }
                    }
                    Value::Array(out)
                }
                Some(Related::One(None)) => Value::Null,
                None => match relationship.cardinality {
                    Cardinality::One => Value::Null,
                    Cardinality::Many => Value::Array(Vec::new()),
                },
            };
            map.insert(relationship.key.clone(), value);
        }
    }
    visited.pop();
    Ok(Value::Object(map))
}

pub fn serialize_records(records: &[Record]) -> Result<Value, AppError> {
    records
        .iter()
        .map(|r| serialize_record(r, &mut Vec::new()))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

pub fn serialize_tuples(rows: &[Vec<TupleCell>]) -> Result<Value, AppError> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut cells = Vec::with_capacity(row.len());
        for cell in row {
            cells.push(match cell {
                TupleCell::Value(v) => serialize_value(v)?,
                TupleCell::Entity(r) => serialize_record(r, &mut Vec::new())?,
            });
        }
        out.push(Value::Array(cells));
    }
    Ok(Value::Array(out))
}
