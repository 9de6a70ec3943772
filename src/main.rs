use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rust_analysis_api::api;
use rust_analysis_api::config::Config;
use rust_analysis_api::db::Database;
use rust_analysis_api::db_storage::PgStore;
use rust_analysis_api::handlers::AppState;

/// Main entry point for the application.
///
/// Initializes logging, configuration, the database (running pending
/// migrations), the application state and the HTTP routes, then starts the
/// Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_analysis_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    db.migrate().await?;
    tracing::info!("Database migrations applied");

    // Build application state
    let store = Arc::new(PgStore::new(db.pool.clone()));
    let app_state = Arc::new(AppState::new(store, config.clone()));
    let app = api::router(app_state)?;

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Peer addresses feed the per-IP rate limiter when no proxy header is present
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
