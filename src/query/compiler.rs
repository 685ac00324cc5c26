//! Condition trees compiled into SELECT / COUNT / DELETE statements.

use crate::config::{Cardinality, Catalog, ColumnDescriptor, RelationshipDescriptor, Resource};
use crate::error::AppError;
use crate::query::field::{Hop, Terminal};
use crate::query::parser::{process, Operator, ParsedQuery};
use crate::query::value::SqlValue;
use crate::sql::{column_ref, select_columns, select_expr, table_of, QueryBuf, MAIN_ALIAS};
use std::collections::HashMap;

/// Positional GET options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Page {
    /// 0 means no limit.
    pub limit: u64,
    /// 0 means no offset.
    pub offset: u64,
    pub count: bool,
}

impl Page {
    fn paged(&self) -> bool {
        self.limit > 0 || self.offset > 0
    }
}

/// One position of a tuple-shaped row.
#[derive(Clone, Debug)]
pub enum Slot {
    Column(ColumnDescriptor),
    /// All columns of a related resource, serialized as one entity.
    Entity(Resource),
}

/// Related rows to batch-load after the main query, nested by chain depth.
#[derive(Clone, Debug)]
pub struct EagerLoad {
    pub relationship: RelationshipDescriptor,
    pub target: Resource,
    pub children: Vec<EagerLoad>,
}

#[derive(Clone, Debug)]
pub enum ResultShape {
    Count,
    Tuples(Vec<Slot>),
    Entities {
        resource: Resource,
        eager: Vec<EagerLoad>,
        /// Ordering through a to-many chain may repeat a main row.
        dedupe: bool,
    },
}

#[derive(Debug)]
pub struct CompiledSelect {
    pub query: QueryBuf,
    pub shape: ResultShape,
}

/// Joins keyed by relationship-chain prefix, so a shared prefix is joined once.
#[derive(Default)]
struct Joins {
    aliases: HashMap<Vec<String>, String>,
    clauses: Vec<String>,
    /// Some join follows a to-many relationship.
    fans_out: bool,
}

impl Joins {
    /// Join every hop of `path` not yet joined; returns the alias of the last one.
    fn require(&mut self, path: &[Hop]) -> String {
        let mut alias = MAIN_ALIAS.to_string();
        let mut prefix = Vec::with_capacity(path.len());
        for hop in path {
            prefix.push(hop.relationship.key.clone());
            alias = match self.aliases.get(&prefix) {
                Some(existing) => existing.clone(),
                None => {
                    let next = format!("j{}", self.aliases.len() + 1);
                    self.clauses.push(format!(
                        " JOIN {} {} ON {} = {}",
                        table_of(hop.target.descriptor()),
                        next,
                        column_ref(Some(&next), &hop.relationship.remote_column),
                        column_ref(Some(&alias), &hop.relationship.local_column)
                    ));
                    self.aliases.insert(prefix.clone(), next.clone());
                    self.fans_out |= hop.relationship.cardinality == Cardinality::Many;
                    next
                }
            };
        }
        alias
    }

    fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    fn sql(&self) -> String {
        self.clauses.concat()
    }
}

fn predicate(alias: &str, column: &ColumnDescriptor, op: Operator, value: &SqlValue, q: &mut QueryBuf) -> String {
    let col = column_ref(Some(alias), &column.key);
    match (op, value) {
        (Operator::Eq, SqlValue::Null) => format!("{} IS NULL", col),
        (Operator::Ne, SqlValue::Null) => format!("{} IS NOT NULL", col),
        (Operator::TextSearch, v) => {
            format!("{} @@ to_tsquery({})", col, q.placeholder(v.clone(), "text"))
        }
        (op, v) => format!(
            "{} {} {}",
            col,
            op.as_sql(),
            q.placeholder(v.clone(), &column.cast_type)
        ),
    }
}

/// WHERE body (groups ORed, conditions ANDed) and the registry indices of projections.
fn compile_filters(parsed: &ParsedQuery, joins: &mut Joins, q: &mut QueryBuf) -> (Option<String>, Vec<usize>) {
    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut projections = Vec::new();
    for group in &parsed.groups {
        let mut clauses = Vec::new();
        for condition in group {
            let field = parsed.field(condition);
            let Some(column) = field.column() else {
                projections.push(condition.field);
                continue;
            };
            let alias = joins.require(&field.hops);
            match (condition.operator, &condition.value) {
                (None, _) => projections.push(condition.field),
                (Some(Operator::Contains), _) | (Some(_), None) => {}
                (Some(op), Some(value)) => clauses.push(predicate(&alias, column, op, value, q)),
            }
        }
        if !clauses.is_empty() {
            groups.push(clauses);
        }
    }
    let clause = match groups.len() {
        0 => None,
        1 => Some(groups[0].join(" AND ")),
        _ => Some(
            groups
                .iter()
                .map(|g| format!("({})", g.join(" AND ")))
                .collect::<Vec<_>>()
                .join(" OR "),
        ),
    };
    (clause, projections)
}

fn insert_eager_path(level: &mut Vec<EagerLoad>, path: &[Hop]) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    let pos = match level
        .iter()
        .position(|l| l.relationship.key == first.relationship.key)
    {
        Some(pos) => pos,
        None => {
            level.push(EagerLoad {
                relationship: first.relationship.clone(),
                target: first.target.clone(),
                children: Vec::new(),
            });
            level.len() - 1
        }
    };
    insert_eager_path(&mut level[pos].children, rest);
}

/// Compile a GET query. An empty `query` selects everything.
pub fn compile_select(
    catalog: &Catalog,
    resource: &Resource,
    query: &str,
    page: Page,
) -> Result<CompiledSelect, AppError> {
    let parsed = process(catalog, resource, query)?;
    let mut q = QueryBuf::new();
    let mut joins = Joins::default();
    let (mut where_clause, projections) = compile_filters(&parsed, &mut joins, &mut q);

    let raw = projections
        .iter()
        .any(|&i| parsed.fields.get(i).field.column().is_some());

    // Entity rows are narrowed by a keyed subquery so paging and counting see
    // each main row once, whatever the filter joins.
    if !raw && !joins.is_empty() {
        let filter_joins = std::mem::take(&mut joins);
        let inner_where = where_clause
            .take()
            .map(|w| format!(" WHERE {}", w))
            .unwrap_or_default();
        where_clause = Some(format!(
            "{main}.ctid IN (SELECT {main}.ctid FROM {table} {main}{joins}{inner_where})",
            main = MAIN_ALIAS,
            table = table_of(resource.descriptor()),
            joins = filter_joins.sql(),
            inner_where = inner_where
        ));
    }

    let mut order = Vec::new();
    if !page.count || page.paged() {
        for entry in parsed.fields.entries() {
            let Some(column) = entry.field.column() else {
                continue;
            };
            if entry.sorts.is_empty() {
                continue;
            }
            let alias = joins.require(&entry.field.hops);
            for direction in &entry.sorts {
                order.push(format!(
                    "{} {}",
                    column_ref(Some(&alias), &column.key),
                    direction.as_sql()
                ));
            }
        }
    }

    let (select, shape) = if raw {
        let mut select = Vec::new();
        let mut slots = Vec::new();
        for &i in &projections {
            let field = &parsed.fields.get(i).field;
            match &field.terminal {
                Terminal::Column(column) => {
                    let alias = joins.require(&field.hops);
                    select.push(select_expr(Some(&alias), column));
                    slots.push(Slot::Column(column.clone()));
                }
                Terminal::Relationship(hop) => {
                    let alias = joins.require(&field.join_path());
                    select.extend(select_columns(Some(&alias), hop.target.columns()));
                    slots.push(Slot::Entity(hop.target.clone()));
                }
            }
        }
        (select, ResultShape::Tuples(slots))
    } else if !resource.is_mapped() {
        let slots = resource.columns().iter().cloned().map(Slot::Column).collect();
        (select_columns(Some(MAIN_ALIAS), resource.columns()), ResultShape::Tuples(slots))
    } else {
        let mut eager = Vec::new();
        if !page.count {
            for &i in &projections {
                insert_eager_path(&mut eager, &parsed.fields.get(i).field.join_path());
            }
        }
        (
            select_columns(Some(MAIN_ALIAS), resource.columns()),
            ResultShape::Entities {
                resource: resource.clone(),
                eager,
                dedupe: joins.fans_out,
            },
        )
    };

    let from = format!("{} {}{}", table_of(resource.descriptor()), MAIN_ALIAS, joins.sql());
    let where_sql = where_clause.map(|w| format!(" WHERE {}", w)).unwrap_or_default();

    if page.count && !raw && !page.paged() {
        q.sql = format!("SELECT COUNT(*) FROM {}{}", from, where_sql);
        return Ok(CompiledSelect {
            query: q,
            shape: ResultShape::Count,
        });
    }

    let mut tail = String::new();
    if !order.is_empty() {
        tail.push_str(&format!(" ORDER BY {}", order.join(", ")));
    }
    if page.limit > 0 {
        tail.push_str(&format!(" LIMIT {}", page.limit));
    }
    if page.offset > 0 {
        tail.push_str(&format!(" OFFSET {}", page.offset));
    }

    if page.count {
        // aliases keep same-named columns of joined tables apart inside the subquery
        let inner: Vec<String> = select
            .iter()
            .enumerate()
            .map(|(i, expr)| format!("{} AS c{}", expr, i))
            .collect();
        q.sql = format!(
            "SELECT COUNT(*) FROM (SELECT {} FROM {}{}{}) AS counted",
            inner.join(", "),
            from,
            where_sql,
            tail
        );
        return Ok(CompiledSelect {
            query: q,
            shape: ResultShape::Count,
        });
    }

    q.sql = format!("SELECT {} FROM {}{}{}", select.join(", "), from, where_sql, tail);
    Ok(CompiledSelect { query: q, shape })
}

/// Compile a DELETE. Projections are ignored; no conditions deletes every row.
pub fn compile_delete(catalog: &Catalog, resource: &Resource, query: &str) -> Result<QueryBuf, AppError> {
    let parsed = process(catalog, resource, query)?;
    let mut q = QueryBuf::new();
    let mut joins = Joins::default();
    let (where_clause, _) = compile_filters(&parsed, &mut joins, &mut q);
    let table = table_of(resource.descriptor());
    let where_sql = where_clause.map(|w| format!(" WHERE {}", w)).unwrap_or_default();

    q.sql = if joins.is_empty() {
        format!("DELETE FROM {} AS {}{}", table, MAIN_ALIAS, where_sql)
    } else {
        format!(
            "DELETE FROM {table} AS {main} WHERE {main}.ctid IN (SELECT {main}.ctid FROM {table} {main}{joins}{where_sql})",
            table = table,
            main = MAIN_ALIAS,
            joins = joins.sql(),
            where_sql = where_sql
        )
    };
    Ok(q)
}
