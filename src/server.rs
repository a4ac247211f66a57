// src/server.rs

use crate::config::Config;
use crate::handler::{apple_callback, AppState};
use axum::routing::{get, post};
use axum::Router;
use std::path::Path;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Path registered as the redirect URI with Apple.
pub const CALLBACK_PATH: &str = "/api/security/apple/callback";

/// Builds the router: the Apple callback, a health probe, and the static landing page.
pub fn router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route(CALLBACK_PATH, post(apple_callback))
        .route("/healthz", get(healthz))
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Binds `config.listen_addr` and serves until Ctrl-C or SIGTERM.
pub async fn serve(config: &Config, state: AppState) -> std::io::Result<()> {
    let app = router(state, &config.static_dir);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;

    info!("Server running on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to listen for SIGTERM: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections.");
}
