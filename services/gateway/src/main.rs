mod config;
mod probe;
mod proxy;
mod routes_chat;
mod routes_status;
mod routes_upload;
mod state;
mod supervisor;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::config::AppConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;
    if !cfg.launcher_path.exists() {
        // Not fatal: uploads still work, launches are skipped until the
        // launcher appears at this path.
        warn!(launcher = %cfg.launcher_path.display(), "launcher not found at startup");
    }

    let app_state = Arc::new(AppState::new(&cfg));

    let app = Router::new()
        .route("/upload", post(routes_upload::upload_model))
        .route("/reload", post(routes_upload::reload_model))
        .route("/check_status", get(routes_status::check_status))
        .route("/chat", post(routes_chat::chat))
        .layer(DefaultBodyLimit::max(cfg.max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(app_state.clone());

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    println!("gateway listening on http://{}", cfg.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // Terminal cleanup: never leave an orphaned model server behind.
    app_state.supervisor.shutdown().await;
    Ok(())
}
