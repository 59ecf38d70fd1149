use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub mod accounts;
pub mod health;
pub mod metrics;
pub mod verify;

/// Base64 photos run about a third larger than the 10 MB raw ceiling.
pub const MAX_BODY_BYTES: usize = 15 * 1024 * 1024;

/// API routes with the shared middleware stack. `/metrics` is mounted by the
/// binary, which owns the Prometheus recorder.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/verify", post(verify::submit_scan))
        .route("/verify/status/{job_id}", get(verify::get_scan_status))
        .route(
            "/verify/{job_id}",
            patch(verify::update_visibility).delete(verify::delete_scan),
        )
        .route("/leaderboard", get(accounts::leaderboard))
        .route("/accounts/{actor_id}", get(accounts::get_account))
        .route("/accounts/{actor_id}/vouchers", get(accounts::list_vouchers))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
}
