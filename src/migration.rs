//! DDL for the schema document: schemas, enum types, tables and foreign keys.
//! Statements are ordered by dependency and safe to run again on startup.

use crate::config::loader::enum_casts;
use crate::config::{
    default_schema_id, validate, ColumnConfig, FullConfig, SchemaConfig, CREATED_AT, UPDATED_AT,
};
use crate::error::{AppError, ConfigError};
use crate::sql::{qualified_table, quoted};
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};

const REFERENTIAL_ACTIONS: [&str; 5] = ["NO ACTION", "RESTRICT", "CASCADE", "SET NULL", "SET DEFAULT"];

fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Run `body` and ignore the error raised when the object already exists.
fn guarded(body: &str) -> String {
    format!(
        "DO $$ BEGIN {}; EXCEPTION WHEN duplicate_object THEN NULL; END $$",
        body
    )
}

fn referential_action(action: Option<&str>) -> Result<&'static str, ConfigError> {
    let wanted = action.unwrap_or("NO ACTION").trim().to_uppercase();
    REFERENTIAL_ACTIONS
        .iter()
        .copied()
        .find(|a| *a == wanted)
        .ok_or_else(|| ConfigError::Validation(format!("invalid referential action '{}'", wanted)))
}

fn lookup<'a, T>(by_id: &HashMap<&str, &'a T>, kind: &'static str, id: &str) -> Result<&'a T, ConfigError> {
    by_id.get(id).copied().ok_or_else(|| ConfigError::MissingReference {
        kind,
        id: id.to_string(),
    })
}

fn schema_name<'a>(schemas_by_id: &HashMap<&str, &'a SchemaConfig>, sid: &str) -> Result<&'a str, ConfigError> {
    lookup(schemas_by_id, "schema", sid).map(|s| s.name.as_str())
}

/// Every statement needed to create the configured database objects.
pub fn ddl_statements(config: &FullConfig) -> Result<Vec<String>, ConfigError> {
    validate(config)?;
    let default_sid = default_schema_id(config)?;
    let schemas_by_id: HashMap<_, _> = config.schemas.iter().map(|s| (s.id.as_str(), s)).collect();
    let enum_types = enum_casts(config, default_sid, &schemas_by_id)?;
    let columns_by_table: HashMap<_, Vec<&ColumnConfig>> =
        config.columns.iter().fold(HashMap::new(), |mut m, c| {
            m.entry(c.table_id.as_str()).or_default().push(c);
            m
        });

    let mut out = Vec::new();

    for s in &config.schemas {
        out.push(format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(&s.name)));
        if let Some(comment) = &s.comment {
            out.push(format!("COMMENT ON SCHEMA {} IS {}", quoted(&s.name), literal(comment)));
        }
    }

    for e in &config.enums {
        let values: Vec<String> = e.values.iter().map(|v| literal(v)).collect();
        let schema = schema_name(&schemas_by_id, e.schema_id.as_deref().unwrap_or(default_sid))?;
        out.push(guarded(&format!(
            "CREATE TYPE {} AS ENUM ({})",
            qualified_table(schema, &e.name),
            values.join(", ")
        )));
    }

    for t in &config.tables {
        let schema = schema_name(&schemas_by_id, t.schema_id.as_deref().unwrap_or(default_sid))?;
        let full_name = qualified_table(schema, &t.name);
        let cols = columns_by_table
            .get(t.id.as_str())
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        let pk = t.primary_key.columns();

        let mut defs: Vec<String> = Vec::new();
        for c in cols {
            let declared = c.type_.name().trim().to_lowercase();
            let ty = enum_types.get(&declared).cloned().unwrap_or_else(|| c.type_.ddl());
            let mut def = format!("{} {}", quoted(&c.name), ty);
            if !c.nullable && !pk.contains(&c.name.as_str()) {
                def.push_str(" NOT NULL");
            }
            if let Some(d) = &c.default {
                def.push_str(" DEFAULT ");
                def.push_str(d.sql());
            }
            defs.push(def);
        }
        if t.timestamped {
            let names: HashSet<&str> = cols.iter().map(|c| c.name.as_str()).collect();
            for name in [CREATED_AT, UPDATED_AT] {
                if !names.contains(name) {
                    defs.push(format!("{} TIMESTAMPTZ NOT NULL DEFAULT NOW()", quoted(name)));
                }
            }
        }
        let pk_cols: Vec<String> = pk.iter().map(|s| quoted(s)).collect();
        defs.push(format!("PRIMARY KEY ({})", pk_cols.join(", ")));
        for u in &t.unique {
            let cols: Vec<String> = u.iter().map(|s| quoted(s)).collect();
            defs.push(format!("UNIQUE ({})", cols.join(", ")));
        }
        for ch in &t.check {
            defs.push(format!("CONSTRAINT {} CHECK ({})", quoted(&ch.name), ch.expression));
        }
        out.push(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            full_name,
            defs.join(",\n  ")
        ));
        if let Some(comment) = &t.comment {
            out.push(format!("COMMENT ON TABLE {} IS {}", full_name, literal(comment)));
        }
    }

    let tables_by_id: HashMap<_, _> = config.tables.iter().map(|t| (t.id.as_str(), t)).collect();
    let columns_by_id: HashMap<_, _> = config.columns.iter().map(|c| (c.id.as_str(), c)).collect();
    for rel in &config.relationships {
        let from_table = lookup(&tables_by_id, "table", &rel.from_table_id)?;
        let to_table = lookup(&tables_by_id, "table", &rel.to_table_id)?;
        let from_col = lookup(&columns_by_id, "column", &rel.from_column_id)?;
        let to_col = lookup(&columns_by_id, "column", &rel.to_column_id)?;
        let from_schema = schema_name(&schemas_by_id, from_table.schema_id.as_deref().unwrap_or(default_sid))?;
        let to_schema = schema_name(&schemas_by_id, to_table.schema_id.as_deref().unwrap_or(default_sid))?;

        out.push(guarded(&format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
            qualified_table(from_schema, &from_table.name),
            quoted(&format!("{}_{}_fkey", from_table.name, from_col.name)),
            quoted(&from_col.name),
            qualified_table(to_schema, &to_table.name),
            quoted(&to_col.name),
            referential_action(rel.on_update.as_deref())?,
            referential_action(rel.on_delete.as_deref())?
        )));
    }

    Ok(out)
}

/// Create every configured object that does not exist yet.
pub async fn apply_migrations(pool: &PgPool, config: &FullConfig) -> Result<(), AppError> {
    let statements = ddl_statements(config)?;
    for sql in &statements {
        tracing::debug!(sql = %sql, "migration");
        sqlx::query(sql).execute(pool).await?;
    }
    tracing::info!(statements = statements.len(), "migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixture_config;

    #[test]
    fn test_statement_order() {
        let ddl = ddl_statements(&fixture_config()).unwrap();
        assert_eq!(ddl[0], "CREATE SCHEMA IF NOT EXISTS \"public\"");
        assert_eq!(
            ddl[1],
            "DO $$ BEGIN CREATE TYPE \"public\".\"mood\" AS ENUM ('happy', 'sad'); EXCEPTION WHEN duplicate_object THEN NULL; END $$"
        );
        assert!(ddl[2].starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"people\" ("));
        assert_eq!(ddl.iter().filter(|s| s.contains("FOREIGN KEY")).count(), 3);
        assert!(ddl.last().unwrap().contains("FOREIGN KEY"));
    }

    #[test]
    fn test_table_definition() {
        let ddl = ddl_statements(&fixture_config()).unwrap();
        let people = ddl.iter().find(|s| s.contains("\"public\".\"people\" (")).unwrap();
        assert!(people.contains("\"id\" uuid DEFAULT gen_random_uuid()"));
        assert!(people.contains("\"name\" text NOT NULL"));
        assert!(people.contains("\"score\" numeric(10, 2)"));
        assert!(people.contains("\"mood\" \"public\".\"mood\""));
        assert!(people.contains("\"created_at\" TIMESTAMPTZ NOT NULL DEFAULT NOW()"));
        assert!(people.contains("PRIMARY KEY (\"id\")"));

        let tags = ddl.iter().find(|s| s.contains("\"public\".\"tags\" (")).unwrap();
        assert!(tags.contains("UNIQUE (\"name\")"));
        assert!(!tags.contains("created_at"));
    }

    #[test]
    fn test_foreign_keys() {
        let ddl = ddl_statements(&fixture_config()).unwrap();
        assert!(ddl.iter().any(|s| s.contains(
            "ALTER TABLE \"public\".\"deals\" ADD CONSTRAINT \"deals_person_id_fkey\" FOREIGN KEY (\"person_id\") REFERENCES \"public\".\"people\" (\"id\") ON UPDATE NO ACTION ON DELETE CASCADE"
        )));
    }

    #[test]
    fn test_invalid_referential_action() {
        let mut config = fixture_config();
        config.relationships[0].on_delete = Some("DROP TABLE x".into());
        assert!(matches!(ddl_statements(&config), Err(ConfigError::Validation(_))));
    }
}
