//! Resource descriptors: the schema document flattened for request handling.

use std::collections::HashMap;
use std::sync::Arc;

/// Semantic column type, derived from the declared PostgreSQL type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    Decimal,
    Text,
    Uuid,
    Bytes,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Duration,
    Json,
    Enum,
    /// No native representation; selecting it as text works, coercing into it does not.
    Unknown,
}

impl ColumnType {
    /// Classify a declared type name. `is_enum` tells whether the name refers to a configured enum.
    pub fn from_declared(declared: &str, is_enum: bool) -> Self {
        if is_enum {
            return ColumnType::Enum;
        }
        let lower = declared.trim().to_lowercase();
        if lower.ends_with("[]") {
            return ColumnType::Unknown;
        }
        let base = lower.split('(').next().unwrap_or("").trim();
        match base {
            "bool" | "boolean" => ColumnType::Bool,
            "smallint" | "int2" | "integer" | "int" | "int4" | "bigint" | "int8" | "serial"
            | "serial4" | "smallserial" | "serial2" | "bigserial" | "serial8" => ColumnType::Int,
            "real" | "float4" | "double precision" | "float8" | "float" => ColumnType::Float,
            "numeric" | "decimal" => ColumnType::Decimal,
            "text" | "varchar" | "character varying" | "char" | "character" | "bpchar"
            | "citext" | "name" => ColumnType::Text,
            "uuid" => ColumnType::Uuid,
            "bytea" => ColumnType::Bytes,
            "date" => ColumnType::Date,
            "time" | "time without time zone" | "timetz" | "time with time zone" => {
                ColumnType::Time
            }
            "timestamp" | "timestamp without time zone" => ColumnType::Timestamp,
            "timestamptz" | "timestamp with time zone" => ColumnType::TimestampTz,
            "interval" => ColumnType::Duration,
            "json" | "jsonb" => ColumnType::Json,
            _ => ColumnType::Unknown,
        }
    }

    /// Name used in client-facing messages.
    pub fn display_name(self) -> &'static str {
        match self {
            ColumnType::Bool => "boolean",
            ColumnType::Int => "integer",
            ColumnType::Float => "float",
            ColumnType::Decimal => "decimal",
            ColumnType::Text => "string",
            ColumnType::Uuid => "uuid",
            ColumnType::Bytes => "bytes",
            ColumnType::Date => "date",
            ColumnType::Time => "time",
            ColumnType::Timestamp | ColumnType::TimestampTz => "datetime",
            ColumnType::Duration => "duration",
            ColumnType::Json => "json",
            ColumnType::Enum => "enum",
            ColumnType::Unknown => "unknown",
        }
    }

    pub fn is_string(self) -> bool {
        matches!(self, ColumnType::Text | ColumnType::Enum)
    }
}

#[derive(Clone, Debug)]
pub struct ColumnDescriptor {
    pub key: String,
    /// Type usable in a `::cast` (serial types mapped to their integer type, enums schema-qualified).
    pub cast_type: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub has_default: bool,
    pub autoincrement: bool,
    pub primary_key: bool,
}

impl ColumnDescriptor {
    /// Must be supplied on create: no default, not nullable, not autoincrement.
    pub fn is_required(&self) -> bool {
        !self.has_default && !self.nullable && !self.autoincrement
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

#[derive(Clone, Debug)]
pub struct RelationshipDescriptor {
    pub key: String,
    pub cardinality: Cardinality,
    /// Lowercased table name of the related resource, looked up in the [`Catalog`].
    pub target: String,
    /// Our column in the join (our FK for the owning side, our key for the referenced side).
    pub local_column: String,
    /// Their column in the join.
    pub remote_column: String,
    pub nullable: bool,
    /// True when we hold the foreign key (the related row must exist before ours).
    pub owns_foreign_key: bool,
}

#[derive(Clone, Debug)]
pub struct ResourceDescriptor {
    pub name: String,
    pub schema: String,
    pub columns: Vec<ColumnDescriptor>,
    pub relationships: Vec<RelationshipDescriptor>,
    pub timestamped: bool,
}

impl ResourceDescriptor {
    pub fn column(&self, key: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.key == key)
    }

    pub fn column_index(&self, key: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.key == key)
    }

    pub fn primary_key(&self) -> Vec<&ColumnDescriptor> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }
}

/// A resolvable resource: mapped (relationship-aware) or a bare table.
#[derive(Clone, Debug)]
pub enum Resource {
    Mapped(Arc<ResourceDescriptor>),
    Bare(Arc<ResourceDescriptor>),
}

impl Resource {
    pub fn descriptor(&self) -> &Arc<ResourceDescriptor> {
        match self {
            Resource::Mapped(d) | Resource::Bare(d) => d,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor().name
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.descriptor().columns
    }

    pub fn column(&self, key: &str) -> Option<&ColumnDescriptor> {
        self.descriptor().column(key)
    }

    /// Relationship metadata; absent for bare tables.
    pub fn relationships(&self) -> Option<&[RelationshipDescriptor]> {
        match self {
            Resource::Mapped(d) => Some(&d.relationships),
            Resource::Bare(_) => None,
        }
    }

    pub fn relationship(&self, key: &str) -> Option<&RelationshipDescriptor> {
        self.relationships()?.iter().find(|r| r.key == key)
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, Resource::Mapped(_))
    }
}

#[derive(Clone, Debug)]
struct CatalogEntry {
    table: Arc<ResourceDescriptor>,
    mapped: Option<Arc<ResourceDescriptor>>,
}

/// Every descriptor known to the process, built once from the schema document.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    entries: HashMap<String, CatalogEntry>,
    order: Vec<String>,
}

impl Catalog {
    /// Register a table. `relationships` is `Some` for mapped resources.
    pub fn insert(
        &mut self,
        descriptor: ResourceDescriptor,
        relationships: Option<Vec<RelationshipDescriptor>>,
    ) {
        let key = descriptor.name.to_lowercase();
        let mapped = relationships.map(|rels| {
            Arc::new(ResourceDescriptor {
                relationships: rels,
                ..descriptor.clone()
            })
        });
        let table = Arc::new(ResourceDescriptor {
            relationships: Vec::new(),
            ..descriptor
        });
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.entries.insert(key, CatalogEntry { table, mapped });
    }

    /// Case-insensitive lookup preferring the mapped descriptor over the bare table.
    pub fn find(&self, name: &str) -> Option<Resource> {
        let entry = self.entries.get(&name.to_lowercase())?;
        Some(match &entry.mapped {
            Some(m) => Resource::Mapped(Arc::clone(m)),
            None => Resource::Bare(Arc::clone(&entry.table)),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
