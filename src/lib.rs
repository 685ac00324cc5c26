//! Tablerest SDK: a query-string driven REST endpoint over a PostgreSQL schema.

pub mod config;
pub mod error;
pub mod handlers;
pub mod migration;
pub mod query;
pub mod registry;
pub mod response;
pub mod routes;
pub mod serialize;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;

pub use config::{load_from_path, resolve, Catalog, FullConfig, Resource};
pub use error::{AppError, ConfigError};
pub use handlers::{Endpoint, EndpointRequest};
pub use migration::{apply_migrations, ddl_statements};
pub use registry::SchemaRegistry;
pub use response::EndpointResponse;
pub use routes::{app_routes, common_routes, endpoint_routes};
pub use service::CrudService;
pub use settings::Settings;
pub use state::AppState;
