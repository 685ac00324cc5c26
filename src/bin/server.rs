//! Server: reads settings, loads and resolves the schema document, creates the
//! configured tables and serves the generic endpoint.

use std::net::SocketAddr;
use tablerest_sdk::{apply_migrations, app_routes, load_from_path, resolve, AppState, SchemaRegistry, Settings};
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let settings = Settings::from_env()?;

    let filter = match &settings.logging {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tablerest_sdk=info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(settings.db_max_connections)
        .connect(&settings.database_url)
        .await?;

    let config = load_from_path(&settings.config_path)?;
    let catalog = resolve(&config)?;
    tracing::info!(resources = catalog.len(), path = %settings.config_path.display(), "schema loaded");
    if settings.create_tables {
        apply_migrations(&pool, &config).await?;
    }

    let state = AppState::new(pool, SchemaRegistry::new(catalog), &settings.database_url);
    let app = app_routes(state).layer(RequestBodyLimitLayer::new(settings.body_limit));

    let addr: SocketAddr = settings.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
