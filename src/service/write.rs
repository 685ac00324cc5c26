//! Nested JSON payloads walked into a write graph.

use crate::config::types::json_type_name;
use crate::config::{
    Cardinality, Catalog, ColumnDescriptor, RelationshipDescriptor, Resource, CREATED_AT, UPDATED_AT,
};
use crate::error::AppError;
use crate::query::coerce::{coerce_payload, CoerceError};
use crate::query::value::SqlValue;
use serde_json::{Map, Value};

/// One row to write plus the related rows supplied with it.
#[derive(Clone, Debug)]
pub struct WriteNode {
    pub resource: Resource,
    /// Supplied columns only, in payload order.
    pub values: Vec<(ColumnDescriptor, SqlValue)>,
    /// Rows we hold a foreign key to; written before this one.
    pub parents: Vec<(RelationshipDescriptor, WriteNode)>,
    /// Rows holding a foreign key to this one; written after it.
    pub children: Vec<(RelationshipDescriptor, Vec<WriteNode>)>,
}

impl WriteNode {
    pub fn value(&self, key: &str) -> Option<&SqlValue> {
        self.values.iter().find(|(c, _)| c.key == key).map(|(_, v)| v)
    }

    /// Set a column, replacing a supplied value.
    pub fn set(&mut self, column: ColumnDescriptor, value: SqlValue) {
        match self.values.iter_mut().find(|(c, _)| c.key == column.key) {
            Some(slot) => slot.1 = value,
            None => self.values.push((column, value)),
        }
    }
}

#[derive(Debug)]
pub enum WriteItems {
    /// `[]`: nothing to write.
    Empty,
    Nodes(Vec<WriteNode>),
}

/// Walk a request body (an object or an array of objects) against `resource`.
pub fn build_items(catalog: &Catalog, resource: &Resource, body: &Value) -> Result<WriteItems, AppError> {
    let objects: Vec<&Map<String, Value>> = match body {
        Value::Object(map) => vec![map],
        Value::Array(items) if items.is_empty() => return Ok(WriteItems::Empty),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_object()
                    .ok_or_else(|| not_a_dictionary(&[], i))
            })
            .collect::<Result<_, _>>()?,
        _ => return Err(AppError::MalformedBody("Body is invalid.".into())),
    };

    let mut nodes = Vec::with_capacity(objects.len());
    for object in objects {
        let node = build_node(catalog, resource, object, &[])?;
        check_required(&node)?;
        nodes.push(node);
    }
    Ok(WriteItems::Nodes(nodes))
}

fn not_a_dictionary(chain: &[String], index: usize) -> AppError {
    let owner = if chain.is_empty() {
        "Root".to_string()
    } else {
        chain.join(".")
    };
    AppError::MalformedBody(format!("{} element #{} should be a dictionary.", owner, index))
}

/// null, false, 0, "", [] and {} drop a relationship key.
fn is_falsy(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

fn build_node(
    catalog: &Catalog,
    resource: &Resource,
    object: &Map<String, Value>,
    chain: &[String],
) -> Result<WriteNode, AppError> {
    let mut node = WriteNode {
        resource: resource.clone(),
        values: Vec::new(),
        parents: Vec::new(),
        children: Vec::new(),
    };
    let timestamped = resource.descriptor().timestamped;

    for (key, value) in object {
        if timestamped && (key == CREATED_AT || key == UPDATED_AT) {
            continue;
        }
        if let Some(column) = resource.column(key) {
            let coerced = coerce_payload(column, value).map_err(|e| payload_error(e, column, chain, key, value))?;
            node.values.push((column.clone(), coerced));
            continue;
        }

        let relationships = resource.relationships().ok_or_else(|| {
            AppError::MetadataInference(format!("Mapper for table '{}' is not present.", resource.name()))
        })?;
        let Some(relationship) = relationships.iter().find(|r| &r.key == key) else {
            return Err(AppError::Field(unknown_key(resource, key, chain)));
        };
        if is_falsy(value) {
            continue;
        }
        let target = catalog.find(&relationship.target).ok_or_else(|| {
            AppError::MetadataInference(format!(
                "Could not infer type for relationship '{}'.",
                relationship.key
            ))
        })?;
        let mut nested_chain = chain.to_vec();
        nested_chain.push(key.clone());

        let related = match (relationship.cardinality, value) {
            (Cardinality::One, Value::Object(map)) => {
                vec![build_node(catalog, &target, map, &nested_chain)?]
            }
            (Cardinality::One, _) => {
                return Err(AppError::MalformedBody(format!(
                    "{} should be a dictionary.",
                    nested_chain.join(".")
                )))
            }
            (Cardinality::Many, Value::Object(map)) => {
                vec![build_node(catalog, &target, map, &nested_chain)?]
            }
            (Cardinality::Many, Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let map = item.as_object().ok_or_else(|| not_a_dictionary(&nested_chain, i))?;
                    out.push(build_node(catalog, &target, map, &nested_chain)?);
                }
                out
            }
            (Cardinality::Many, _) => {
                return Err(AppError::MalformedBody(format!(
                    "{} should be a list of dictionaries.",
                    nested_chain.join(".")
                )))
            }
        };

        if relationship.owns_foreign_key {
            if let Some(parent) = related.into_iter().next() {
                node.parents.push((relationship.clone(), parent));
            }
        } else {
            node.children.push((relationship.clone(), related));
        }
    }
    Ok(node)
}

fn payload_error(
    e: CoerceError,
    column: &ColumnDescriptor,
    chain: &[String],
    key: &str,
    value: &Value,
) -> AppError {
    let mut path = chain.to_vec();
    path.push(key.to_string());
    match e {
        CoerceError::Uninferable => AppError::MetadataInference(format!(
            "Could not infer type of column '{}'.",
            column.key
        )),
        CoerceError::Invalid | CoerceError::NotNullable => AppError::Value(format!(
            "Value of type '{}' of parameter '{}' is invalid, should be valid value of type '{}'.",
            json_type_name(value),
            path.join("."),
            column.column_type.display_name()
        )),
    }
}

fn unknown_key(resource: &Resource, key: &str, chain: &[String]) -> String {
    let available: Vec<String> = resource
        .columns()
        .iter()
        .map(|c| format!("'{}'", c.key))
        .chain(
            resource
                .relationships()
                .unwrap_or_default()
                .iter()
                .map(|r| format!("'{}'", r.key)),
        )
        .collect();
    let owner = if chain.is_empty() {
        format!("'{}' table", resource.name())
    } else {
        format!("'{}' relationship", chain.join("."))
    };
    format!(
        "Field '{}' is not present in the {}. Available fields: {}.",
        key,
        owner,
        available.join(", ")
    )
}

/// Every required column absent or null, reported together. A foreign key
/// filled in from a supplied parent row counts as present.
fn check_required(node: &WriteNode) -> Result<(), AppError> {
    let missing: Vec<String> = node
        .resource
        .columns()
        .iter()
        .filter(|c| c.is_required())
        .filter(|c| !matches!(node.value(&c.key), Some(v) if !v.is_null()))
        .filter(|c| !node.parents.iter().any(|(r, _)| r.local_column == c.key))
        .map(|c| c.key.clone())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::RequiredFields {
            table: node.resource.name().to_string(),
            fields: missing,
        })
    }
}
