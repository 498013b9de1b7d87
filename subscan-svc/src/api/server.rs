//! HTTP server setup and routing

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use subscan_common::{Error, Result};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::AppContext;

/// Build the application router
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(super::handlers::health))
        // Gmail scan lifecycle
        .route("/v1/gmail/scan/start", post(super::handlers::gmail_scan_start))
        .route("/v1/gmail/scan/run", post(super::handlers::gmail_scan_run))
        .route("/v1/gmail/scan/cancel", post(super::handlers::gmail_scan_cancel))
        .route("/v1/gmail/scan/status", get(super::handlers::gmail_scan_status))
        .route("/v1/gmail/scan/stream", get(super::sse::scan_stream))
        .route(
            "/v1/gmail/scan/diagnostics/:session_id",
            get(super::handlers::gmail_scan_diagnostics),
        )
        // Provider-agnostic surfaces
        .route("/v1/email/verify", post(super::handlers::email_verify))
        .route("/v1/email/scan", post(super::handlers::email_scan))
        .route("/v1/merchant/confirm", post(super::handlers::merchant_confirm))
        .with_state(ctx)
        .layer(CorsLayer::permissive())
}

/// Bind and serve until shutdown
pub async fn run(ctx: AppContext, host: &str, port: u16) -> Result<()> {
    let app = build_router(ctx);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| Error::Config(format!("bad bind address: {e}")))?;
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("failed to bind to {addr}: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Internal(format!("server error: {e}")))?;

    Ok(())
}
