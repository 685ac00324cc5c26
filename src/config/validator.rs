//! Schema document validation: referential integrity and naming.

use crate::config::FullConfig;
use crate::error::ConfigError;
use regex::Regex;
use std::collections::{HashMap, HashSet};

/// Default schema id when tables or enums omit schema_id.
pub fn default_schema_id(config: &FullConfig) -> Result<&str, ConfigError> {
    config
        .schemas
        .first()
        .map(|s| s.id.as_str())
        .ok_or_else(|| ConfigError::Validation("at least one schema required".into()))
}

fn check_identifier(ident_re: &Regex, kind: &str, name: &str) -> Result<(), ConfigError> {
    if ident_re.is_match(name) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("invalid {} name '{}'", kind, name)))
    }
}

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let ident_re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    let default_sid = default_schema_id(config)?;
    let schema_ids: HashSet<&str> = config.schemas.iter().map(|s| s.id.as_str()).collect();
    let table_ids: HashSet<&str> = config.tables.iter().map(|t| t.id.as_str()).collect();
    let column_table: HashMap<&str, &str> = config
        .columns
        .iter()
        .map(|c| (c.id.as_str(), c.table_id.as_str()))
        .collect();

    for s in &config.schemas {
        check_identifier(&ident_re, "schema", &s.name)?;
    }

    for e in &config.enums {
        let sid = e.schema_id.as_deref().unwrap_or(default_sid);
        if !schema_ids.contains(sid) {
            return Err(ConfigError::MissingReference {
                kind: "schema",
                id: sid.to_string(),
            });
        }
        check_identifier(&ident_re, "enum", &e.name)?;
    }

    let mut table_names = HashSet::new();
    for t in &config.tables {
        let sid = t.schema_id.as_deref().unwrap_or(default_sid);
        if !schema_ids.contains(sid) {
            return Err(ConfigError::MissingReference {
                kind: "schema",
                id: sid.to_string(),
            });
        }
        check_identifier(&ident_re, "table", &t.name)?;
        if !table_names.insert(t.name.to_lowercase()) {
            return Err(ConfigError::DuplicateTable(t.name.clone()));
        }
        let table_columns: HashSet<&str> = config
            .columns
            .iter()
            .filter(|c| c.table_id == t.id)
            .map(|c| c.name.as_str())
            .collect();
        for pk in t.primary_key.columns() {
            if !table_columns.contains(pk) {
                return Err(ConfigError::InvalidPrimaryKey {
                    table_id: t.id.clone(),
                    column: pk.to_string(),
                });
            }
        }
    }

    for c in &config.columns {
        if !table_ids.contains(c.table_id.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "table",
                id: c.table_id.clone(),
            });
        }
        check_identifier(&ident_re, "column", &c.name)?;
    }

    // relationship keys per table, seeded with column names so collisions surface too
    let mut keys_by_table: HashMap<&str, HashSet<String>> = HashMap::new();
    for c in &config.columns {
        keys_by_table
            .entry(c.table_id.as_str())
            .or_default()
            .insert(c.name.clone());
    }
    let table_name_by_id: HashMap<&str, &str> = config
        .tables
        .iter()
        .map(|t| (t.id.as_str(), t.name.as_str()))
        .collect();

    for r in &config.relationships {
        let from_ok = column_table.get(r.from_column_id.as_str()) == Some(&r.from_table_id.as_str());
        let to_ok = column_table.get(r.to_column_id.as_str()) == Some(&r.to_table_id.as_str());
        if !table_ids.contains(r.from_table_id.as_str())
            || !table_ids.contains(r.to_table_id.as_str())
            || !from_ok
            || !to_ok
        {
            return Err(ConfigError::MissingReference {
                kind: "relationship",
                id: r.id.clone(),
            });
        }
        let forward = r
            .name
            .clone()
            .or_else(|| table_name_by_id.get(r.to_table_id.as_str()).map(|s| s.to_string()))
            .unwrap_or_default();
        let backward = r
            .back_name
            .clone()
            .or_else(|| table_name_by_id.get(r.from_table_id.as_str()).map(|s| s.to_string()))
            .unwrap_or_default();
        for (table_id, key) in [(r.from_table_id.as_str(), forward), (r.to_table_id.as_str(), backward)] {
            check_identifier(&ident_re, "relationship", &key)?;
            if !keys_by_table.entry(table_id).or_default().insert(key.clone()) {
                return Err(ConfigError::Validation(format!(
                    "relationship '{}' of relationship id '{}' collides with another field on table '{}'",
                    key, r.id, table_id
                )));
            }
        }
    }

    let mut mapped = HashSet::new();
    for res in &config.resources {
        if !table_ids.contains(res.table_id.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "table",
                id: res.table_id.clone(),
            });
        }
        if !mapped.insert(res.table_id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "table '{}' is mapped more than once",
                res.table_id
            )));
        }
    }

    Ok(())
}
