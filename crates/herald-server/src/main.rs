mod config;

use std::sync::Arc;

use axum::http::{HeaderValue, Method, header};
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use herald_api::auth::{AppState, AppStateInner};
use herald_api::router::build_router;
use herald_session::Session;
use herald_session::bridge::BridgeConnector;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env();

    // Init database
    let db = herald_db::Database::open(&config.db_path)?;

    // Messaging session, one per process
    let connector = BridgeConnector::new(&config.bridge_url, &config.session_path);
    let session = Session::new(Arc::new(connector));
    info!("Messaging bridge at {}", config.bridge_url);

    let state: AppState = Arc::new(AppStateInner {
        db,
        session,
        jwt_secret: config.jwt_secret.clone(),
        token_ttl: config.token_ttl,
    });

    let cors = CorsLayer::new()
        .allow_origin(config.frontend_url.parse::<HeaderValue>()?)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true);

    let mut app = build_router(state.clone());

    if let Some(dir) = &config.static_dir {
        if dir.is_dir() {
            // client-side routes fall back to index.html
            let spa = ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html")));
            app = app.fallback_service(spa);
            info!("Serving SPA from {}", dir.display());
        } else {
            warn!("HERALD_STATIC_DIR {} is not a directory, not serving SPA", dir.display());
        }
    }

    let app = app.layer(cors).layer(TraceLayer::new_for_http());

    info!("Herald server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Tear the browser session down with the process
    state.session.reset().await;
    info!("Herald server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
