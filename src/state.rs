//! Shared application state for all routes. The registry is built once at startup.

use crate::registry::SchemaRegistry;
use crate::response::mask_database_url;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub registry: Arc<SchemaRegistry>,
    /// Connection URL with the password masked, for `/settings/info`.
    pub database_url: Arc<str>,
}

impl AppState {
    pub fn new(pool: PgPool, registry: SchemaRegistry, database_url: &str) -> Self {
        AppState {
            pool,
            registry: Arc::new(registry),
            database_url: Arc::from(mask_database_url(database_url)),
        }
    }
}
