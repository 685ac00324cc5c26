//! Load the schema document from disk and resolve it into a [`Catalog`].

use crate::config::resolved::{
    Cardinality, Catalog, ColumnDescriptor, ColumnType, RelationshipDescriptor, ResourceDescriptor,
};
use crate::config::types::*;
use crate::config::{default_schema_id, validate, FullConfig};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};
use std::path::Path;

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

/// Build the descriptor catalog from a full config (validates first).
pub fn resolve(config: &FullConfig) -> Result<Catalog, ConfigError> {
    validate(config)?;
    let default_sid = default_schema_id(config)?;

    let schemas_by_id: HashMap<_, _> = config.schemas.iter().map(|s| (s.id.as_str(), s)).collect();
    let columns_by_table: HashMap<_, Vec<&ColumnConfig>> =
        config.columns.iter().fold(HashMap::new(), |mut m, c| {
            m.entry(c.table_id.as_str()).or_default().push(c);
            m
        });
    let mapped_ids: HashSet<&str> = config.resources.iter().map(|r| r.table_id.as_str()).collect();
    let enum_casts = enum_casts(config, default_sid, &schemas_by_id)?;

    let mut catalog = Catalog::default();
    for table in &config.tables {
        let table_sid = table.schema_id.as_deref().unwrap_or(default_sid);
        let schema = schemas_by_id
            .get(table_sid)
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "schema",
                id: table_sid.to_string(),
            })?;
        let table_columns = columns_by_table
            .get(table.id.as_str())
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        let pk_names = table.primary_key.columns();

        let mut columns: Vec<ColumnDescriptor> = table_columns
            .iter()
            .map(|c| column_descriptor(c, pk_names.contains(&c.name.as_str()), &enum_casts))
            .collect();

        if table.timestamped {
            for name in [CREATED_AT, UPDATED_AT] {
                if !columns.iter().any(|c| c.key == name) {
                    columns.push(ColumnDescriptor {
                        key: name.to_string(),
                        cast_type: "timestamptz".into(),
                        column_type: ColumnType::TimestampTz,
                        nullable: false,
                        has_default: true,
                        autoincrement: false,
                        primary_key: false,
                    });
                }
            }
        }

        let relationships = if mapped_ids.contains(table.id.as_str()) {
            Some(build_relationships(&table.id, config)?)
        } else {
            None
        };
        catalog.insert(
            ResourceDescriptor {
                name: table.name.clone(),
                schema: schema.name.clone(),
                columns,
                relationships: Vec::new(),
                timestamped: table.timestamped,
            },
            relationships,
        );
    }

    tracing::debug!(tables = catalog.len(), mapped = mapped_ids.len(), "catalog resolved");
    Ok(catalog)
}

/// Enum type names (bare and schema-qualified, lowercased) to their cast expression.
pub(crate) fn enum_casts(
    config: &FullConfig,
    default_sid: &str,
    schemas_by_id: &HashMap<&str, &SchemaConfig>,
) -> Result<HashMap<String, String>, ConfigError> {
    let mut out = HashMap::new();
    for e in &config.enums {
        let sid = e.schema_id.as_deref().unwrap_or(default_sid);
        let schema = schemas_by_id.get(sid).ok_or_else(|| ConfigError::MissingReference {
            kind: "schema",
            id: sid.to_string(),
        })?;
        let cast = format!("{}.{}", quote_ident(&schema.name), quote_ident(&e.name));
        out.insert(e.name.to_lowercase(), cast.clone());
        out.insert(format!("{}.{}", schema.name, e.name).to_lowercase(), cast);
    }
    Ok(out)
}

fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn column_descriptor(
    c: &ColumnConfig,
    primary_key: bool,
    enum_casts: &HashMap<String, String>,
) -> ColumnDescriptor {
    let declared = c.type_.name().trim().to_lowercase();
    let enum_cast = enum_casts.get(&declared);
    let base = declared.split('(').next().unwrap_or("").trim().to_string();
    let serial_cast = match base.as_str() {
        "serial" | "serial4" => Some("int4"),
        "bigserial" | "serial8" => Some("int8"),
        "smallserial" | "serial2" => Some("int2"),
        _ => None,
    };
    let cast_type = match (enum_cast, serial_cast) {
        (Some(e), _) => e.clone(),
        (None, Some(s)) => s.to_string(),
        (None, None) => base,
    };
    ColumnDescriptor {
        key: c.name.clone(),
        cast_type,
        column_type: ColumnType::from_declared(&declared, enum_cast.is_some()),
        nullable: c.nullable && !primary_key,
        has_default: c.default.is_some() || serial_cast.is_some(),
        autoincrement: c.autoincrement.unwrap_or(serial_cast.is_some()),
        primary_key,
    }
}

/// Both sides of every foreign key touching `our_table_id`.
fn build_relationships(
    our_table_id: &str,
    config: &FullConfig,
) -> Result<Vec<RelationshipDescriptor>, ConfigError> {
    let column_by_id: HashMap<&str, &ColumnConfig> =
        config.columns.iter().map(|c| (c.id.as_str(), c)).collect();
    let table_name_by_id: HashMap<&str, &str> = config
        .tables
        .iter()
        .map(|t| (t.id.as_str(), t.name.as_str()))
        .collect();
    let lookup_column = |id: &str| {
        column_by_id
            .get(id)
            .copied()
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "column",
                id: id.to_string(),
            })
    };
    let lookup_table = |id: &str| {
        table_name_by_id
            .get(id)
            .copied()
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "table",
                id: id.to_string(),
            })
    };

    let mut out = Vec::new();
    for rel in &config.relationships {
        if rel.from_table_id != our_table_id && rel.to_table_id != our_table_id {
            continue;
        }
        let from_col = lookup_column(&rel.from_column_id)?;
        let to_col = lookup_column(&rel.to_column_id)?;
        let from_table = lookup_table(&rel.from_table_id)?;
        let to_table = lookup_table(&rel.to_table_id)?;
        if rel.from_table_id == our_table_id {
            out.push(RelationshipDescriptor {
                key: rel.name.clone().unwrap_or_else(|| to_table.to_string()),
                cardinality: Cardinality::One,
                target: to_table.to_lowercase(),
                local_column: from_col.name.clone(),
                remote_column: to_col.name.clone(),
                nullable: from_col.nullable,
                owns_foreign_key: true,
            });
        }
        if rel.to_table_id == our_table_id {
            out.push(RelationshipDescriptor {
                key: rel.back_name.clone().unwrap_or_else(|| from_table.to_string()),
                cardinality: if rel.one_to_one {
                    Cardinality::One
                } else {
                    Cardinality::Many
                },
                target: from_table.to_lowercase(),
                local_column: to_col.name.clone(),
                remote_column: from_col.name.clone(),
                nullable: true,
                owns_foreign_key: false,
            });
        }
    }
    Ok(out)
}

const SECTIONS: [&str; 6] = [
    "schemas",
    "enums",
    "tables",
    "columns",
    "relationships",
    "resources",
];

/// Load the schema document from a single JSON file, or from a directory holding
/// one `<section>.json` array per section (missing sections are empty).
pub fn load_from_path(path: &Path) -> Result<FullConfig, ConfigError> {
    let mut config: FullConfig = if path.is_dir() {
        let mut doc = serde_json::Map::new();
        for section in SECTIONS {
            let file = path.join(format!("{}.json", section));
            if !file.exists() {
                continue;
            }
            let text = std::fs::read_to_string(&file)
                .map_err(|e| ConfigError::Load(format!("{}: {}", file.display(), e)))?;
            let value: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| ConfigError::Load(format!("{}: {}", file.display(), e)))?;
            doc.insert(section.to_string(), value);
        }
        serde_json::from_value(serde_json::Value::Object(doc))
            .map_err(|e| ConfigError::Load(e.to_string()))?
    } else {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Load(e.to_string()))?
    };
    if config.schemas.is_empty() {
        config.schemas.push(SchemaConfig {
            id: "default".into(),
            name: "public".into(),
            comment: None,
        });
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{fixture_config, Resource};

    #[test]
    fn test_mapped_and_bare_resources() {
        let catalog = resolve(&fixture_config()).unwrap();
        assert_eq!(catalog.len(), 5);
        assert!(matches!(catalog.find("People"), Some(Resource::Mapped(_))));
        assert!(matches!(catalog.find("tags"), Some(Resource::Bare(_))));
        assert!(catalog.find("unknown").is_none());
    }

    #[test]
    fn test_relationships_both_directions() {
        let catalog = resolve(&fixture_config()).unwrap();
        let people = catalog.find("people").unwrap();
        let keys: Vec<&str> = people
            .relationships()
            .unwrap()
            .iter()
            .map(|r| r.key.as_str())
            .collect();
        assert_eq!(keys, vec!["parent", "children", "deals"]);

        let deals = people.relationship("deals").unwrap();
        assert_eq!(deals.cardinality, Cardinality::Many);
        assert_eq!(deals.local_column, "id");
        assert_eq!(deals.remote_column, "person_id");
        assert!(!deals.owns_foreign_key);

        let person = catalog.find("deals").unwrap();
        let person = person.relationship("person").unwrap();
        assert_eq!(person.cardinality, Cardinality::One);
        assert_eq!(person.target, "people");
        assert!(person.owns_foreign_key);
        assert!(!person.nullable);
    }

    #[test]
    fn test_column_flags() {
        let catalog = resolve(&fixture_config()).unwrap();
        let deals = catalog.find("deals").unwrap();
        let id = deals.column("id").unwrap();
        assert!(id.autoincrement && id.primary_key && !id.is_required());
        assert_eq!(id.cast_type, "int4");
        let required: Vec<&str> = deals
            .columns()
            .iter()
            .filter(|c| c.is_required())
            .map(|c| c.key.as_str())
            .collect();
        assert_eq!(required, vec!["person_id", "price"]);
        assert!(deals.column(CREATED_AT).is_some());

        let people = catalog.find("people").unwrap();
        let mood = people.column("mood").unwrap();
        assert_eq!(mood.column_type, ColumnType::Enum);
        assert_eq!(mood.cast_type, "\"public\".\"mood\"");
        assert_eq!(people.column("score").unwrap().cast_type, "numeric");

        let additions = catalog.find("additions").unwrap();
        assert!(additions.column(CREATED_AT).is_none());
    }

    #[test]
    fn test_load_single_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/schema.json");
        let config = load_from_path(&path).unwrap();
        assert_eq!(config.tables.len(), 5);
        assert_eq!(config.schemas[0].name, "public");
    }

    #[test]
    fn test_load_directory_of_sections() {
        let dir = std::env::temp_dir().join(format!("tablerest-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("tables.json"),
            r#"[{"id": "t_notes", "name": "notes", "primary_key": "id"}]"#,
        )
        .unwrap();
        let loaded = load_from_path(&dir);
        std::fs::remove_dir_all(&dir).unwrap();

        let config = loaded.unwrap();
        assert_eq!(config.tables[0].name, "notes");
        assert!(config.columns.is_empty());
        // no schemas section: the default schema is supplied
        assert_eq!(config.schemas.len(), 1);
        assert_eq!(config.schemas[0].name, "public");
    }

    #[test]
    fn test_load_reports_bad_json() {
        let path = std::env::temp_dir().join(format!("tablerest-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, "{").unwrap();
        let loaded = load_from_path(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(loaded, Err(ConfigError::Load(_))));
    }
}
