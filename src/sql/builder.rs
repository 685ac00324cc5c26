//! SQL text helpers: quoting, typed placeholders, select expressions and write statements.
//! Identifiers come from the schema document only; values are always parameters.

use crate::config::{ColumnDescriptor, ColumnType, ResourceDescriptor, UPDATED_AT};
use crate::query::value::SqlValue;

pub const MAIN_ALIAS: &str = "main";

/// Quote identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

pub fn table_of(descriptor: &ResourceDescriptor) -> String {
    qualified_table(&descriptor.schema, &descriptor.name)
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl QueryBuf {
    pub fn new() -> Self {
        QueryBuf::default()
    }

    pub fn push_param(&mut self, v: SqlValue) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// Bind `v` and return its placeholder cast to `cast_type`.
    pub fn placeholder(&mut self, v: SqlValue, cast_type: &str) -> String {
        let n = self.push_param(v);
        format!("${}::{}", n, cast_type)
    }
}

pub fn column_ref(alias: Option<&str>, key: &str) -> String {
    match alias {
        Some(a) => format!("{}.{}", a, quoted(key)),
        None => quoted(key),
    }
}

/// Column as selected, cast so every column type decodes into one fixed Rust type.
pub fn select_expr(alias: Option<&str>, column: &ColumnDescriptor) -> String {
    let col = column_ref(alias, &column.key);
    match column.column_type {
        ColumnType::Int => format!("{}::int8", col),
        ColumnType::Float => format!("{}::float8", col),
        ColumnType::Decimal | ColumnType::Text | ColumnType::Enum | ColumnType::Unknown => {
            format!("{}::text", col)
        }
        ColumnType::Time => format!("{}::time", col),
        ColumnType::Duration => format!("EXTRACT(EPOCH FROM {})::float8", col),
        _ => col,
    }
}

pub fn select_columns(alias: Option<&str>, columns: &[ColumnDescriptor]) -> Vec<String> {
    columns.iter().map(|c| select_expr(alias, c)).collect()
}

/// SELECT all columns WHERE column IN (...). Used for batch-loading related rows.
pub fn select_by_column_in(
    descriptor: &ResourceDescriptor,
    column: &ColumnDescriptor,
    values: &[SqlValue],
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = table_of(descriptor);
    let cols = select_columns(Some(MAIN_ALIAS), &descriptor.columns).join(", ");
    if values.is_empty() {
        q.sql = format!("SELECT {} FROM {} {} WHERE 1 = 0", cols, table, MAIN_ALIAS);
        return q;
    }
    let placeholders: Vec<String> = values
        .iter()
        .map(|v| q.placeholder(v.clone(), &column.cast_type))
        .collect();
    let order: Vec<String> = descriptor
        .primary_key()
        .iter()
        .map(|c| column_ref(Some(MAIN_ALIAS), &c.key))
        .collect();
    let order_clause = if order.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", order.join(", "))
    };
    q.sql = format!(
        "SELECT {} FROM {} {} WHERE {} IN ({}){}",
        cols,
        table,
        MAIN_ALIAS,
        column_ref(Some(MAIN_ALIAS), &column.key),
        placeholders.join(", "),
        order_clause
    );
    q
}

/// INSERT ... RETURNING every column. Null values are left out so column
/// defaults apply; with nothing left it inserts DEFAULT VALUES.
pub fn insert(descriptor: &ResourceDescriptor, values: &[(ColumnDescriptor, SqlValue)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let head = insert_head(&mut q, descriptor, values);
    q.sql = format!(
        "{} RETURNING {}",
        head,
        select_columns(None, &descriptor.columns).join(", ")
    );
    q
}

/// INSERT ... ON CONFLICT (primary key) DO UPDATE of the supplied columns.
/// Supplied nulls are written as NULL on update; timestamped tables refresh `updated_at`.
pub fn upsert(descriptor: &ResourceDescriptor, values: &[(ColumnDescriptor, SqlValue)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let head = insert_head(&mut q, descriptor, values);
    let pk: Vec<String> = descriptor.primary_key().iter().map(|c| quoted(&c.key)).collect();

    let mut sets = Vec::new();
    for (column, value) in values {
        if column.primary_key {
            continue;
        }
        let rhs = q.placeholder(value.clone(), &column.cast_type);
        sets.push(format!("{} = {}", quoted(&column.key), rhs));
    }
    if descriptor.timestamped && descriptor.column(UPDATED_AT).is_some() {
        sets.push(format!("{} = NOW()", quoted(UPDATED_AT)));
    }
    if sets.is_empty() {
        // keeps RETURNING populated when the row already exists
        if let Some(first) = pk.first() {
            sets.push(format!("{} = EXCLUDED.{}", first, first));
        }
    }
    q.sql = format!(
        "{} ON CONFLICT ({}) DO UPDATE SET {} RETURNING {}",
        head,
        pk.join(", "),
        sets.join(", "),
        select_columns(None, &descriptor.columns).join(", ")
    );
    q
}

fn insert_head(
    q: &mut QueryBuf,
    descriptor: &ResourceDescriptor,
    values: &[(ColumnDescriptor, SqlValue)],
) -> String {
    let table = table_of(descriptor);
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for (column, value) in values {
        if value.is_null() {
            continue;
        }
        cols.push(quoted(&column.key));
        placeholders.push(q.placeholder(value.clone(), &column.cast_type));
    }
    if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", table)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            cols.join(", "),
            placeholders.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixture_catalog;

    #[test]
    fn test_quoting() {
        assert_eq!(quoted("a\"b"), "\"a\"\"b\"");
        assert_eq!(qualified_table("public", "people"), "\"public\".\"people\"");
    }

    #[test]
    fn test_select_expressions_are_typed() {
        let catalog = fixture_catalog();
        let deals = catalog.find("deals").unwrap();
        let d = deals.descriptor();
        assert_eq!(select_expr(Some("main"), d.column("id").unwrap()), "main.\"id\"::int8");
        assert_eq!(select_expr(None, d.column("price").unwrap()), "\"price\"::text");
        assert_eq!(
            select_expr(Some("j1"), d.column("duration").unwrap()),
            "EXTRACT(EPOCH FROM j1.\"duration\")::float8"
        );
        assert_eq!(select_expr(None, d.column("signed_at").unwrap()), "\"signed_at\"");
    }

    #[test]
    fn test_select_by_column_in() {
        let catalog = fixture_catalog();
        let deals = catalog.find("deals").unwrap();
        let d = deals.descriptor();
        let q = select_by_column_in(d, d.column("person_id").unwrap(), &[SqlValue::Uuid(uuid::Uuid::nil())]);
        assert!(q.sql.ends_with(
            "FROM \"public\".\"deals\" main WHERE main.\"person_id\" IN ($1::uuid) ORDER BY main.\"id\""
        ));
        assert_eq!(q.params.len(), 1);

        let empty = select_by_column_in(d, d.column("person_id").unwrap(), &[]);
        assert!(empty.sql.ends_with("WHERE 1 = 0"));
    }

    #[test]
    fn test_insert_skips_nulls() {
        let catalog = fixture_catalog();
        let people = catalog.find("people").unwrap();
        let d = people.descriptor();
        let values = vec![
            (d.column("name").unwrap().clone(), SqlValue::Text("Ann".into())),
            (d.column("age").unwrap().clone(), SqlValue::Null),
        ];
        let q = insert(d, &values);
        assert!(q.sql.starts_with("INSERT INTO \"public\".\"people\" (\"name\") VALUES ($1::text) RETURNING "));
        assert_eq!(q.params, vec![SqlValue::Text("Ann".into())]);

        let q = insert(d, &[]);
        assert!(q.sql.starts_with("INSERT INTO \"public\".\"people\" DEFAULT VALUES RETURNING "));
    }

    #[test]
    fn test_upsert_updates_supplied_columns() {
        let catalog = fixture_catalog();
        let people = catalog.find("people").unwrap();
        let d = people.descriptor();
        let id = uuid::Uuid::nil();
        let values = vec![
            (d.column("id").unwrap().clone(), SqlValue::Uuid(id)),
            (d.column("age").unwrap().clone(), SqlValue::Null),
        ];
        let q = upsert(d, &values);
        assert!(q.sql.contains(
            "INSERT INTO \"public\".\"people\" (\"id\") VALUES ($1::uuid) ON CONFLICT (\"id\") DO UPDATE SET \"age\" = $2::int4, \"updated_at\" = NOW() RETURNING "
        ));
        assert_eq!(q.params, vec![SqlValue::Uuid(id), SqlValue::Null]);
    }
}
