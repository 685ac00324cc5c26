//! Route name to resource descriptor lookup, memoized per route.

use crate::config::{Catalog, Resource};
use std::collections::HashMap;
use std::sync::RwLock;

/// Resolves request routes against the catalog. Lookups are case-insensitive
/// and remembered; concurrent first lookups of one route may both resolve, and
/// they produce the same descriptor.
#[derive(Debug)]
pub struct SchemaRegistry {
    catalog: Catalog,
    routes: RwLock<HashMap<String, Resource>>,
}

impl SchemaRegistry {
    pub fn new(catalog: Catalog) -> Self {
        SchemaRegistry {
            catalog,
            routes: RwLock::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Descriptor for `route`, preferring a mapped resource over a bare table.
    pub fn resolve(&self, route: &str) -> Option<Resource> {
        let key = route.to_lowercase();
        {
            let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
            if let Some(found) = routes.get(&key) {
                return Some(found.clone());
            }
        }
        let found = self.catalog.find(&key)?;
        tracing::debug!(route = %key, mapped = found.is_mapped(), "route resolved");
        self.routes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, found.clone());
        Some(found)
    }

    /// Number of routes resolved so far.
    pub fn cached_routes(&self) -> usize {
        self.routes.read().map(|r| r.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixture_catalog;
    use std::sync::Arc;

    #[test]
    fn test_case_insensitive_lookup_is_memoized() {
        let registry = SchemaRegistry::new(fixture_catalog());
        let first = registry.resolve("PEOPLE").unwrap();
        let second = registry.resolve("people").unwrap();
        assert!(Arc::ptr_eq(first.descriptor(), second.descriptor()));
        assert_eq!(registry.cached_routes(), 1);
    }

    #[test]
    fn test_unknown_route_is_absent() {
        let registry = SchemaRegistry::new(fixture_catalog());
        assert!(registry.resolve("nonexistent").is_none());
        assert_eq!(registry.cached_routes(), 0);
    }

    #[test]
    fn test_bare_table_fallback() {
        let registry = SchemaRegistry::new(fixture_catalog());
        assert!(!registry.resolve("Tags").unwrap().is_mapped());
        assert!(registry.resolve("deals").unwrap().is_mapped());
    }

    #[test]
    fn test_concurrent_first_lookups_agree() {
        let registry = Arc::new(SchemaRegistry::new(fixture_catalog()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.resolve("additions").map(|r| r.name().to_string()))
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap().as_deref(), Some("additions"));
        }
        assert_eq!(registry.cached_routes(), 1);
    }
}
