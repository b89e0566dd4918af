//! HTTP API: Axum server over the shared `ServiceContext`.
//!
//! Route aliases are separate entries pointing at the same handler; nothing
//! re-enters the router. CORS is open for browser front-ends.

pub mod error;
pub mod routes;

use std::future::Future;

use anyhow::{Context, Result};
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use error::ApiError;
use routes::AppState;

/// Paths served by the convert handler.
pub const CONVERT_ROUTES: [&str; 6] = [
    "/convert",
    "/withdraw",
    "/coinbase-withdraw",
    "/send-to-coinbase",
    "/backend-to-coinbase",
    "/treasury-to-coinbase",
];

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let mut router = Router::new()
        .route("/", get(routes::banner))
        .route("/health", get(routes::health))
        .route("/status", get(routes::status))
        .route("/eth-price", get(routes::eth_price))
        .route("/balance", get(routes::balance))
        .route("/earnings", get(routes::earnings))
        .route("/execute", post(routes::execute))
        .route("/send-eth", post(routes::send_eth))
        .route("/transfer", post(routes::send_eth))
        .route("/fund-from-earnings", post(routes::fund_from_earnings))
        .route("/pause", post(routes::pause))
        .route("/resume", post(routes::resume))
        .route("/pause-status", get(routes::pause_status));

    for path in CONVERT_ROUTES {
        router = router.route(path, post(routes::convert));
    }

    router.layer(cors).with_state(state)
}

/// Bind `port` and serve until `shutdown` resolves.
pub async fn serve<F>(state: AppState, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!(port, "HTTP server listening on http://localhost:{port}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
