//! Query-string mini-language: `|` separates OR groups, `&` separates AND
//! conditions, each condition is `field[.|..][op value]`.

use crate::config::{Catalog, ColumnDescriptor, Resource};
use crate::error::AppError;
use crate::query::coerce::{apparent_type, coerce_literal, CoerceError};
use crate::query::field::{resolve_field, FieldKey, ResolvedField, Terminal, TerminalPolicy};
use crate::query::value::SqlValue;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    /// `@@`, full-text match against `to_tsquery(value)`.
    TextSearch,
    /// `@>`, accepted but never filters.
    Contains,
    Ge,
    Le,
    Ne,
    Eq,
    Gt,
    Lt,
}

/// Checked in this order; the first operator found in a condition wins.
const OPERATORS: [(&str, Operator); 8] = [
    ("@@", Operator::TextSearch),
    ("@>", Operator::Contains),
    (">=", Operator::Ge),
    ("<=", Operator::Le),
    ("!=", Operator::Ne),
    ("=", Operator::Eq),
    (">", Operator::Gt),
    ("<", Operator::Lt),
];

impl Operator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Operator::TextSearch => "@@",
            Operator::Contains => "@>",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::Ne => "!=",
            Operator::Eq => "=",
            Operator::Gt => ">",
            Operator::Lt => "<",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// `+` means space, then percent-decoding; invalid UTF-8 is replaced.
pub fn decode_query(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    let bytes = urlencoding::decode_binary(spaced.as_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Split a condition at the first operator found, in precedence order.
pub fn split_condition(token: &str) -> (&str, Option<Operator>, &str) {
    for (symbol, op) in OPERATORS {
        if let Some(pos) = token.find(symbol) {
            return (&token[..pos], Some(op), &token[pos + symbol.len()..]);
        }
    }
    (token, None, "")
}

fn sort_direction(name: &str) -> Option<SortDirection> {
    if name.ends_with("..") {
        Some(SortDirection::Desc)
    } else if name.ends_with('.') {
        Some(SortDirection::Asc)
    } else {
        None
    }
}

pub struct FieldEntry {
    pub field: ResolvedField,
    /// Sort directives in the order they were written.
    pub sorts: Vec<SortDirection>,
}

/// Resolved fields in first-seen order, one entry per [`FieldKey`].
#[derive(Default)]
pub struct FieldRegistry {
    entries: Vec<FieldEntry>,
    index: HashMap<FieldKey, usize>,
}

impl FieldRegistry {
    fn register(&mut self, field: ResolvedField) -> usize {
        if let Some(&i) = self.index.get(&field.key) {
            return i;
        }
        let i = self.entries.len();
        self.index.insert(field.key.clone(), i);
        self.entries.push(FieldEntry {
            field,
            sorts: Vec::new(),
        });
        i
    }

    pub fn get(&self, i: usize) -> &FieldEntry {
        &self.entries[i]
    }

    pub fn entries(&self) -> &[FieldEntry] {
        &self.entries
    }
}

#[derive(Clone, Debug)]
pub struct Condition {
    /// Index into the [`FieldRegistry`].
    pub field: usize,
    /// `None` makes the condition a projection.
    pub operator: Option<Operator>,
    pub value: Option<SqlValue>,
}

/// Condition tree (OR of AND groups) plus the fields it references.
#[derive(Default)]
pub struct ParsedQuery {
    pub fields: FieldRegistry,
    pub groups: Vec<Vec<Condition>>,
}

impl ParsedQuery {
    pub fn field(&self, condition: &Condition) -> &ResolvedField {
        &self.fields.get(condition.field).field
    }
}

/// Parse a raw (still percent-encoded) query string against `resource`.
pub fn process(catalog: &Catalog, resource: &Resource, query: &str) -> Result<ParsedQuery, AppError> {
    let decoded = decode_query(query);
    let mut parsed = ParsedQuery::default();

    for group_src in decoded.split('|') {
        let mut group = Vec::new();
        for token in group_src.split('&').filter(|t| !t.is_empty()) {
            let (name, operator, raw) = split_condition(token);
            let policy = if operator.is_some() {
                TerminalPolicy::ColumnsOnly
            } else {
                TerminalPolicy::AllowRelationship
            };
            let field = resolve_field(catalog, resource, name, policy)?;
            let value = match (&field.terminal, operator) {
                (Terminal::Column(_), None | Some(Operator::Contains)) => None,
                (Terminal::Column(_), Some(Operator::TextSearch)) => Some(SqlValue::Text(raw.to_string())),
                (Terminal::Column(column), Some(_)) => Some(coerce_condition(resource, column, name, raw)?),
                (Terminal::Relationship(_), _) => None,
            };
            let sort = match field.terminal {
                Terminal::Column(_) => sort_direction(name),
                Terminal::Relationship(_) => None,
            };
            let index = parsed.fields.register(field);
            if let Some(direction) = sort {
                parsed.fields.entries[index].sorts.push(direction);
            }
            group.push(Condition {
                field: index,
                operator,
                value,
            });
        }
        if !group.is_empty() {
            parsed.groups.push(group);
        }
    }
    Ok(parsed)
}

fn coerce_condition(
    resource: &Resource,
    column: &ColumnDescriptor,
    name: &str,
    raw: &str,
) -> Result<SqlValue, AppError> {
    coerce_literal(column, raw).map_err(|e| match e {
        CoerceError::Uninferable => AppError::MetadataInference(format!(
            "Could not infer type of column '{}' reached from '{}'.",
            column.key,
            resource.name()
        )),
        CoerceError::Invalid | CoerceError::NotNullable => AppError::Value(format!(
            "Value of type '{}' of parameter '{}' is invalid, should be valid value of type '{}'.",
            apparent_type(raw),
            name.trim_end_matches('.'),
            column.column_type.display_name()
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixture_catalog;

    fn parse(route: &str, query: &str) -> Result<ParsedQuery, AppError> {
        let catalog = fixture_catalog();
        let resource = catalog.find(route).unwrap();
        process(&catalog, &resource, query)
    }

    #[test]
    fn test_operator_precedence() {
        assert_eq!(split_condition("age>=5"), ("age", Some(Operator::Ge), "5"));
        assert_eq!(split_condition("age<=5"), ("age", Some(Operator::Le), "5"));
        assert_eq!(split_condition("age!=5"), ("age", Some(Operator::Ne), "5"));
        assert_eq!(split_condition("note=a>b"), ("note", Some(Operator::Eq), "a>b"));
        assert_eq!(split_condition("doc@@cat&dog"), ("doc", Some(Operator::TextSearch), "cat&dog"));
        assert_eq!(split_condition("name."), ("name.", None, ""));
    }

    #[test]
    fn test_decode_query() {
        assert_eq!(decode_query("name=John+Smith"), "name=John Smith");
        assert_eq!(decode_query("name=a%2Bb"), "name=a+b");
        assert_eq!(decode_query("x=%zz"), "x=%zz");
    }

    #[test]
    fn test_groups_and_conditions() {
        let parsed = parse("people", "age=1&name=x|age=3").unwrap();
        assert_eq!(parsed.groups.len(), 2);
        assert_eq!(parsed.groups[0].len(), 2);
        assert_eq!(parsed.groups[0][0].value, Some(SqlValue::Int(1)));
        assert_eq!(parsed.groups[0][1].value, Some(SqlValue::Text("x".into())));
        // same field, same registry entry
        assert_eq!(parsed.groups[0][0].field, parsed.groups[1][0].field);
    }

    #[test]
    fn test_projection_and_sort() {
        let parsed = parse("people", "name.&age..>3").unwrap();
        let first = &parsed.groups[0][0];
        assert_eq!(first.operator, None);
        assert!(first.value.is_none());
        let entries = parsed.fields.entries();
        assert_eq!(entries[0].sorts, vec![SortDirection::Asc]);
        assert_eq!(entries[1].sorts, vec![SortDirection::Desc]);
    }

    #[test]
    fn test_relationship_projection_has_no_sort() {
        let parsed = parse("people", "deals..").unwrap();
        assert!(parsed.fields.entries()[0].sorts.is_empty());
        assert!(matches!(
            parsed.field(&parsed.groups[0][0]).terminal,
            Terminal::Relationship(_)
        ));
    }

    #[test]
    fn test_relationship_with_operator_is_rejected() {
        assert!(matches!(parse("people", "deals=1"), Err(AppError::Field(_))));
    }

    #[test]
    fn test_value_error_message() {
        match parse("people", "age=abc") {
            Err(AppError::Value(msg)) => assert_eq!(
                msg,
                "Value of type 'string' of parameter 'age' is invalid, should be valid value of type 'integer'."
            ),
            other => panic!("unexpected {:?}", other.map(|p| p.groups.len())),
        }
        assert!(matches!(parse("people", "active=yes"), Err(AppError::Value(_))));
        assert!(matches!(parse("people", "active="), Err(AppError::Value(_))));
    }

    #[test]
    fn test_empty_value_on_nullable_column_is_null() {
        let parsed = parse("people", "age=").unwrap();
        assert_eq!(parsed.groups[0][0].value, Some(SqlValue::Null));
    }

    #[test]
    fn test_contains_and_text_search_values() {
        let parsed = parse("people", "meta@>{}&name@@cat").unwrap();
        assert!(parsed.groups[0][0].value.is_none());
        assert_eq!(parsed.groups[0][1].value, Some(SqlValue::Text("cat".into())));
    }

    #[test]
    fn test_encoded_separators_still_split() {
        let parsed = parse("people", "name=a%26age=1").unwrap();
        assert_eq!(parsed.groups[0].len(), 2);
        assert_eq!(parsed.groups[0][0].value, Some(SqlValue::Text("a".into())));
    }

    #[test]
    fn test_empty_tokens_are_skipped() {
        let parsed = parse("people", "age=1&").unwrap();
        assert_eq!(parsed.groups.len(), 1);
        assert_eq!(parsed.groups[0].len(), 1);
        assert!(parse("people", "").unwrap().groups.is_empty());
    }
}
