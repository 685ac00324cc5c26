//! Execution of compiled statements against PostgreSQL.

use crate::config::{Cardinality, ColumnDescriptor, ColumnType, RelationshipDescriptor, Resource};
use crate::error::AppError;
use crate::query::coerce::seconds_to_duration;
use crate::query::compiler::{EagerLoad, Slot};
use crate::query::value::SqlValue;
use crate::serialize::{Record, RecordIdentity, Related, TupleCell};
use crate::service::write::WriteNode;
use crate::sql::{insert, select_by_column_in, upsert, QueryBuf};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// POST: every row is inserted.
    Insert,
    /// PUT: rows carrying their full primary key are merged.
    Upsert,
}

pub struct CrudService;

impl CrudService {
    /// Scalar count; NULL reads as 0.
    pub async fn count(pool: &PgPool, q: &QueryBuf) -> Result<i64, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query_scalar::<_, Option<i64>>(&q.sql);
        for p in &q.params {
            query = query.bind(p.clone());
        }
        let n = query.fetch_optional(pool).await?;
        Ok(n.flatten().unwrap_or(0))
    }

    /// Rows laid out as `slots`; an entity slot spans all of its resource's columns.
    pub async fn fetch_tuples(
        pool: &PgPool,
        q: &QueryBuf,
        slots: &[Slot],
    ) -> Result<Vec<Vec<TupleCell>>, AppError> {
        let rows = prepare(q).fetch_all(pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut offset = 0;
            let mut cells = Vec::with_capacity(slots.len());
            for slot in slots {
                match slot {
                    Slot::Column(column) => {
                        cells.push(TupleCell::Value(decode_cell(row, offset, column)?));
                        offset += 1;
                    }
                    Slot::Entity(resource) => {
                        let values = decode_row(row, offset, resource.columns())?;
                        offset += values.len();
                        cells.push(TupleCell::Entity(Record::new(resource.clone(), values)));
                    }
                }
            }
            out.push(cells);
        }
        Ok(out)
    }

    /// Main rows of `resource`, then every relationship in `eager` batch-loaded
    /// with one `IN` query per level.
    pub async fn fetch_entities(
        pool: &PgPool,
        q: &QueryBuf,
        resource: &Resource,
        eager: &[EagerLoad],
        dedupe: bool,
    ) -> Result<Vec<Record>, AppError> {
        let rows = prepare(q).fetch_all(pool).await?;
        let mut records = rows
            .iter()
            .map(|row| decode_row(row, 0, resource.columns()).map(|v| Record::new(resource.clone(), v)))
            .collect::<Result<Vec<_>, _>>()?;
        if dedupe {
            records = dedupe_records(records);
        }
        load_related(pool, &mut records, eager).await?;
        Ok(records)
    }

    /// Execute a compiled DELETE in its own transaction; returns rows removed.
    pub async fn delete(pool: &PgPool, q: &QueryBuf) -> Result<u64, AppError> {
        let mut tx = pool.begin().await?;
        let result = prepare(q).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Write every node graph in one transaction.
    pub async fn persist(pool: &PgPool, nodes: Vec<WriteNode>, mode: WriteMode) -> Result<(), AppError> {
        let mut tx = pool.begin().await?;
        for node in nodes {
            write_node(&mut *tx, node, mode).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn prepare(q: &QueryBuf) -> sqlx::query::Query<'_, Postgres, PgArguments> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(p.clone());
    }
    query
}

/// Keep the first occurrence of each row.
fn dedupe_records(records: Vec<Record>) -> Vec<Record> {
    let mut seen: HashSet<RecordIdentity> = HashSet::new();
    records.into_iter().filter(|r| seen.insert(r.identity())).collect()
}

fn missing_column(resource: &Resource, key: &str) -> AppError {
    AppError::MetadataInference(format!(
        "Column '{}' is not present on '{}'.",
        key,
        resource.name()
    ))
}

fn load_related<'a>(
    pool: &'a PgPool,
    records: &'a mut [Record],
    eager: &'a [EagerLoad],
) -> BoxFuture<'a, Result<(), AppError>> {
    Box::pin(async move {
        for load in eager {
            let relationship = &load.relationship;
            let remote = load
                .target
                .column(&relationship.remote_column)
                .ok_or_else(|| missing_column(&load.target, &relationship.remote_column))?;

            let keys = related_keys(records, relationship);
            let mut related = if keys.is_empty() {
                Vec::new()
            } else {
                let q = select_by_column_in(load.target.descriptor(), remote, &keys);
                let rows = prepare(&q).fetch_all(pool).await?;
                rows.iter()
                    .map(|row| {
                        decode_row(row, 0, load.target.columns())
                            .map(|v| Record::new(load.target.clone(), v))
                    })
                    .collect::<Result<Vec<_>, _>>()?
            };
            load_related(pool, &mut related, &load.children).await?;
            attach_related(records, relationship, related);
        }
        Ok(())
    })
}

/// Distinct non-null join values of `records`, in first-seen order.
fn related_keys(records: &[Record], relationship: &RelationshipDescriptor) -> Vec<SqlValue> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|r| r.value(&relationship.local_column))
        .filter(|v| !v.is_null() && seen.insert(v.key_repr()))
        .cloned()
        .collect()
}

/// Group `related` by their join column and hang each group on the matching record:
/// the first match for a to-one relationship, all of them for a to-many one.
fn attach_related(records: &mut [Record], relationship: &RelationshipDescriptor, related: Vec<Record>) {
    let mut by_key: HashMap<String, Vec<Record>> = HashMap::new();
    for child in related {
        let key = child
            .value(&relationship.remote_column)
            .map(SqlValue::key_repr)
            .unwrap_or_default();
        by_key.entry(key).or_default().push(child);
    }
    for record in records.iter_mut() {
        let matches = record
            .value(&relationship.local_column)
            .filter(|v| !v.is_null())
            .and_then(|v| by_key.get(&v.key_repr()))
            .cloned()
            .unwrap_or_default();
        let value = match relationship.cardinality {
            Cardinality::One => Related::One(matches.into_iter().next().map(Box::new)),
            Cardinality::Many => Related::Many(matches),
        };
        record.related.push((relationship.key.clone(), value));
    }
}

/// True when every primary-key column was supplied with a non-null value.
fn has_full_key(node: &WriteNode) -> bool {
    let pk = node.resource.descriptor().primary_key();
    !pk.is_empty()
        && pk
            .iter()
            .all(|c| matches!(node.value(&c.key), Some(v) if !v.is_null()))
}

fn value_at(resource: &Resource, values: &[SqlValue], key: &str) -> Result<SqlValue, AppError> {
    resource
        .descriptor()
        .column_index(key)
        .and_then(|i| values.get(i))
        .cloned()
        .ok_or_else(|| missing_column(resource, key))
}

/// Parents first (their key fills our foreign key), then this row, then
/// children with their foreign key pointed at us. Returns the stored row.
fn write_node<'a>(
    conn: &'a mut PgConnection,
    mut node: WriteNode,
    mode: WriteMode,
) -> BoxFuture<'a, Result<Vec<SqlValue>, AppError>> {
    Box::pin(async move {
        for (relationship, parent) in std::mem::take(&mut node.parents) {
            let target = parent.resource.clone();
            let stored = write_node(&mut *conn, parent, mode).await?;
            adopt_parent_key(&mut node, &relationship, &target, &stored)?;
        }

        let descriptor = node.resource.descriptor().clone();
        let q = if mode == WriteMode::Upsert && has_full_key(&node) {
            upsert(&descriptor, &node.values)
        } else {
            insert(&descriptor, &node.values)
        };
        let row = prepare(&q).fetch_one(&mut *conn).await?;
        let stored = decode_row(&row, 0, &descriptor.columns)?;

        for (relationship, mut children) in std::mem::take(&mut node.children) {
            point_children_at(&node.resource, &stored, &relationship, &mut children)?;
            for child in children {
                write_node(&mut *conn, child, mode).await?;
            }
        }
        Ok(stored)
    })
}

/// Copy the stored parent's referenced column into our foreign key.
fn adopt_parent_key(
    node: &mut WriteNode,
    relationship: &RelationshipDescriptor,
    parent: &Resource,
    stored: &[SqlValue],
) -> Result<(), AppError> {
    let value = value_at(parent, stored, &relationship.remote_column)?;
    let column = node
        .resource
        .column(&relationship.local_column)
        .cloned()
        .ok_or_else(|| missing_column(&node.resource, &relationship.local_column))?;
    node.set(column, value);
    Ok(())
}

/// Set each child's foreign key to our stored key, replacing anything supplied.
fn point_children_at(
    resource: &Resource,
    stored: &[SqlValue],
    relationship: &RelationshipDescriptor,
    children: &mut [WriteNode],
) -> Result<(), AppError> {
    let value = value_at(resource, stored, &relationship.local_column)?;
    for child in children.iter_mut() {
        let column = child
            .resource
            .column(&relationship.remote_column)
            .cloned()
            .ok_or_else(|| missing_column(&child.resource, &relationship.remote_column))?;
        child.set(column, value.clone());
    }
    Ok(())
}

fn decode_row(row: &PgRow, offset: usize, columns: &[ColumnDescriptor]) -> Result<Vec<SqlValue>, AppError> {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| decode_cell(row, offset + i, c))
        .collect()
}

/// Decode one cell; the select expression already cast it to the type read here.
fn decode_cell(row: &PgRow, idx: usize, column: &ColumnDescriptor) -> Result<SqlValue, AppError> {
    let value = match column.column_type {
        ColumnType::Bool => row.try_get::<Option<bool>, _>(idx)?.map(SqlValue::Bool),
        ColumnType::Int => row.try_get::<Option<i64>, _>(idx)?.map(SqlValue::Int),
        ColumnType::Float => row.try_get::<Option<f64>, _>(idx)?.map(SqlValue::Float),
        ColumnType::Decimal => row.try_get::<Option<String>, _>(idx)?.map(SqlValue::Decimal),
        ColumnType::Text | ColumnType::Enum | ColumnType::Unknown => {
            row.try_get::<Option<String>, _>(idx)?.map(SqlValue::Text)
        }
        ColumnType::Uuid => row.try_get::<Option<uuid::Uuid>, _>(idx)?.map(SqlValue::Uuid),
        ColumnType::Bytes => row.try_get::<Option<Vec<u8>>, _>(idx)?.map(SqlValue::Bytes),
        ColumnType::Date => row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)?
            .map(SqlValue::Date),
        ColumnType::Time => row
            .try_get::<Option<chrono::NaiveTime>, _>(idx)?
            .map(SqlValue::Time),
        ColumnType::Timestamp => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)?
            .map(SqlValue::Timestamp),
        ColumnType::TimestampTz => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)?
            .map(|d| SqlValue::TimestampTz(d.fixed_offset())),
        ColumnType::Duration => row.try_get::<Option<f64>, _>(idx)?.map(|secs| {
            seconds_to_duration(secs)
                .map(SqlValue::Duration)
                .unwrap_or(SqlValue::Float(secs))
        }),
        ColumnType::Json => row
            .try_get::<Option<serde_json::Value>, _>(idx)?
            .map(SqlValue::Json),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}
