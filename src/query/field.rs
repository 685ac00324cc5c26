//! Dotted field paths resolved against descriptors and their relationships.

use crate::config::{Catalog, ColumnDescriptor, RelationshipDescriptor, Resource};
use crate::error::AppError;

/// One relationship traversal.
#[derive(Clone, Debug)]
pub struct Hop {
    pub relationship: RelationshipDescriptor,
    pub target: Resource,
}

#[derive(Clone, Debug)]
pub enum Terminal {
    Column(ColumnDescriptor),
    Relationship(Hop),
}

/// Identity of a resolved field: relationship keys walked, then the terminal key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldKey {
    pub chain: Vec<String>,
    pub terminal: String,
}

#[derive(Clone, Debug)]
pub struct ResolvedField {
    pub key: FieldKey,
    pub hops: Vec<Hop>,
    pub terminal: Terminal,
}

impl ResolvedField {
    pub fn column(&self) -> Option<&ColumnDescriptor> {
        match &self.terminal {
            Terminal::Column(c) => Some(c),
            Terminal::Relationship(_) => None,
        }
    }

    /// Hops that must be joined to reach the terminal's rows; a relationship terminal counts as one.
    pub fn join_path(&self) -> Vec<Hop> {
        let mut path = self.hops.clone();
        if let Terminal::Relationship(hop) = &self.terminal {
            path.push(hop.clone());
        }
        path
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminalPolicy {
    ColumnsOnly,
    AllowRelationship,
}

/// Walk `path` (e.g. `deals.person.name`) from `resource`.
pub fn resolve_field(
    catalog: &Catalog,
    resource: &Resource,
    path: &str,
    policy: TerminalPolicy,
) -> Result<ResolvedField, AppError> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = resource.clone();
    let mut chain_names = vec![resource.name().to_string()];
    let mut hops: Vec<Hop> = Vec::new();

    for (i, field) in segments.iter().copied().enumerate() {
        let has_more = segments[i + 1..].iter().any(|s| !s.is_empty());
        let key = |hops: &[Hop]| FieldKey {
            chain: hops.iter().map(|h| h.relationship.key.clone()).collect(),
            terminal: field.to_string(),
        };

        if let Some(column) = current.column(field) {
            if has_more {
                return Err(AppError::Field(format!(
                    "Field '{}' of '{}' is a column and has no fields.",
                    field,
                    chain_names.join(".")
                )));
            }
            return Ok(ResolvedField {
                key: key(&hops),
                terminal: Terminal::Column(column.clone()),
                hops,
            });
        }

        let relationships = current.relationships().ok_or_else(|| {
            AppError::MetadataInference(format!(
                "Mapper for table '{}' is not present.",
                current.name()
            ))
        })?;
        let relationship = relationships
            .iter()
            .find(|r| r.key == field)
            .ok_or_else(|| AppError::Field(not_present(&current, field, &chain_names, hops.is_empty())))?;
        let target = catalog.find(&relationship.target).ok_or_else(|| {
            AppError::MetadataInference(format!(
                "Could not infer type for relationship '{}'.",
                relationship.key
            ))
        })?;
        let hop = Hop {
            relationship: relationship.clone(),
            target,
        };

        if !has_more {
            if policy == TerminalPolicy::ColumnsOnly {
                return Err(AppError::Field(format!(
                    "Field '{}' is a relationship of '{}'; name one of its fields instead.",
                    field,
                    chain_names.join(".")
                )));
            }
            return Ok(ResolvedField {
                key: key(&hops),
                terminal: Terminal::Relationship(hop),
                hops,
            });
        }

        chain_names.push(field.to_string());
        current = hop.target.clone();
        hops.push(hop);
    }

    // split always yields at least one segment and the last one never has more
    Err(AppError::Field(format!("Field '{}' is empty.", path)))
}

fn not_present(resource: &Resource, field: &str, chain_names: &[String], root: bool) -> String {
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
    format!(
        "Field '{}' is not present in the '{}' {}. Available fields: {}.",
        field,
        chain_names.join("."),
        if root { "table" } else { "relationship" },
        available.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{fixture_catalog, Cardinality};

    fn resolve(route: &str, path: &str, policy: TerminalPolicy) -> Result<ResolvedField, AppError> {
        let catalog = fixture_catalog();
        let resource = catalog.find(route).unwrap();
        resolve_field(&catalog, &resource, path, policy)
    }

    #[test]
    fn test_plain_column() {
        let f = resolve("people", "name", TerminalPolicy::ColumnsOnly).unwrap();
        assert!(f.hops.is_empty());
        assert_eq!(f.column().map(|c| c.key.as_str()), Some("name"));
        assert_eq!(f.key, FieldKey { chain: vec![], terminal: "name".into() });
    }

    #[test]
    fn test_chain_through_relationships() {
        let f = resolve("additions", "deal.person.name", TerminalPolicy::ColumnsOnly).unwrap();
        let chain: Vec<&str> = f.hops.iter().map(|h| h.relationship.key.as_str()).collect();
        assert_eq!(chain, vec!["deal", "person"]);
        assert_eq!(f.hops[1].target.name(), "people");
        assert_eq!(f.key.chain, vec!["deal".to_string(), "person".to_string()]);
    }

    #[test]
    fn test_sort_markers_do_not_change_the_key() {
        let a = resolve("people", "deals.price", TerminalPolicy::ColumnsOnly).unwrap();
        let b = resolve("people", "deals.price..", TerminalPolicy::ColumnsOnly).unwrap();
        assert_eq!(a.key, b.key);
    }

    #[test]
    fn test_relationship_terminal_policy() {
        let f = resolve("people", "deals", TerminalPolicy::AllowRelationship).unwrap();
        match &f.terminal {
            Terminal::Relationship(hop) => {
                assert_eq!(hop.relationship.cardinality, Cardinality::Many);
                assert_eq!(hop.target.name(), "deals");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(f.join_path().len(), 1);
        assert!(matches!(
            resolve("people", "deals", TerminalPolicy::ColumnsOnly),
            Err(AppError::Field(_))
        ));
    }

    #[test]
    fn test_unknown_field_lists_available_fields() {
        match resolve("countries", "bogus", TerminalPolicy::ColumnsOnly) {
            Err(AppError::Field(msg)) => assert_eq!(
                msg,
                "Field 'bogus' is not present in the 'countries' table. Available fields: 'id', 'name'."
            ),
            other => panic!("unexpected {:?}", other.map(|f| f.key)),
        }
    }

    #[test]
    fn test_unknown_field_inside_relationship() {
        match resolve("people", "deals.bogus", TerminalPolicy::ColumnsOnly) {
            Err(AppError::Field(msg)) => {
                assert!(msg.starts_with("Field 'bogus' is not present in the 'people.deals' relationship."));
                assert!(msg.contains("'price'"));
                assert!(msg.contains("'additions'"));
            }
            other => panic!("unexpected {:?}", other.map(|f| f.key)),
        }
    }

    #[test]
    fn test_bare_table_cannot_infer_relationships() {
        match resolve("tags", "owner.name", TerminalPolicy::ColumnsOnly) {
            Err(AppError::MetadataInference(msg)) => {
                assert_eq!(msg, "Mapper for table 'tags' is not present.")
            }
            other => panic!("unexpected {:?}", other.map(|f| f.key)),
        }
        assert!(resolve("tags", "color", TerminalPolicy::ColumnsOnly).is_ok());
    }

    #[test]
    fn test_column_with_trailing_segments() {
        assert!(matches!(
            resolve("people", "name.first", TerminalPolicy::ColumnsOnly),
            Err(AppError::Field(_))
        ));
    }
}
