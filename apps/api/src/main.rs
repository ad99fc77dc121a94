mod auth;
mod config;
mod conversations;
mod db;
mod documents;
mod errors;
mod extract;
mod models;
mod routes;
mod state;
mod validation;
#[cfg(test)]
mod test_support;

use anyhow::Result;
use axum::http::HeaderValue;
use chrono::Duration;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::auth::store::PgUserStore;
use crate::auth::tokens::TokenKeys;
use crate::config::Config;
use crate::conversations::store::PgConversationStore;
use crate::db::create_pool;
use crate::documents::store::PgDocumentStore;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting DiftAgent API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL and run migrations
    let db = create_pool(&config.database_url, config.db_max_connections).await?;

    let tokens = TokenKeys::new(
        &config.jwt_secret,
        Duration::minutes(config.access_token_expire_minutes),
        Duration::days(config.refresh_token_expire_days),
    );
    info!(
        "Token lifetimes: access {}m, refresh {}d",
        config.access_token_expire_minutes, config.refresh_token_expire_days
    );
    if config.api_keys.is_empty() {
        info!("No API keys configured; tool authorization requires a login");
    }

    // Build app state
    let state = AppState {
        users: Arc::new(PgUserStore::new(db.clone())),
        documents: Arc::new(PgDocumentStore::new(db.clone())),
        conversations: Arc::new(PgConversationStore::new(db)),
        tokens,
        config: config.clone(),
    };

    // Cookies are only sent cross-origin to an explicit origin with credentials allowed.
    let cors = CorsLayer::new()
        .allow_origin(config.cors_origin.parse::<HeaderValue>()?)
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request());

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C so in-flight requests can finish before exit.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
