//! Route organization by domain, merged into one router in
//! [`build_router`]. Each submodule exposes a `Router<Arc<AppState>>`
//! builder, mirroring the per-domain sub-router pattern this codebase
//! family already uses for its HTTP layer.

pub mod files;
pub mod login;
pub mod misc;
pub mod session;
pub mod terminal;

use std::sync::Arc;

use axum::{middleware, Router};
use portal_telemetry::middleware::metrics_middleware;
use portal_telemetry::tracing_setup::request_id_middleware;

use crate::rate_limit_middleware::RateLimitLayer;
use crate::state::AppState;

/// Assemble the full application router: every domain sub-router merged
/// together, wrapped in the rate-limiting, request-id, and metrics
/// middleware every binary in this lineage applies at the top level.
pub fn build_router(state: Arc<AppState>) -> Router {
    let rate_limiter = state.rate_limiter.clone();
    Router::new()
        .merge(misc::router())
        .merge(login::router())
        .merge(session::router())
        .merge(terminal::router())
        .merge(files::router())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(RateLimitLayer::new(rate_limiter))
        .with_state(state)
}
