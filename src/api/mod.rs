//! HTTP status surface
//!
//! Read-mostly view over the coordinator, all under `/api/v1`:
//! - `GET  /health` current health report and coordinator state
//! - `GET  /events?limit=N` most recent healing events
//! - `GET  /stats` aggregates derived from the event log
//! - `GET  /patterns` the anomaly pattern library
//! - `POST /rollback/:patch_id` revert an applied patch

pub mod handlers;
pub mod response;

pub use handlers::ApiState;

use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Comma-separated list of origins allowed cross-origin access
const CORS_ORIGINS_ENV: &str = "MENDER_CORS_ORIGINS";

/// Same-origin only unless `MENDER_CORS_ORIGINS` names allowed origins.
fn build_cors_layer() -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);
    match std::env::var(CORS_ORIGINS_ENV) {
        Ok(origins) => {
            let allowed: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            info!(origins = %origins, "CORS: allowing configured origins");
            base.allow_origin(allowed)
        }
        Err(_) => base,
    }
}

pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/events", get(handlers::events))
        .route("/stats", get(handlers::stats))
        .route("/patterns", get(handlers::patterns))
        .route("/rollback/:patch_id", post(handlers::rollback))
        .with_state(state)
}

pub fn create_app(state: ApiState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
}

/// Serve the API on `addr` until `cancel` fires.
pub async fn serve(addr: &str, state: ApiState, cancel: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP API listening");
    axum::serve(listener, create_app(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
