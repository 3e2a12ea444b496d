//! Landing page and the two ambient operational endpoints (§6). Neither
//! `/healthz` nor `/readyz` passes through the Request Gate — they carry
//! no session semantics and sit in front of any load balancer.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use portal_telemetry::metrics::global_metrics;

use crate::state::AppState;

const LANDING_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>portal</title></head>
<body>
<h1>portal</h1>
<p><a href="/login">Log in</a> to open a terminal session.</p>
</body>
</html>"#;

async fn landing() -> Html<&'static str> {
    Html(LANDING_PAGE)
}

/// Liveness probe: the process is up. Always 200.
async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 iff the Container Driver reports the engine
/// reachable, 503 otherwise.
async fn readyz(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.registry.engine_reachable().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus text-format scrape endpoint, same as `/healthz` unauthenticated.
async fn metrics() -> String {
    global_metrics().export_prometheus()
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(landing))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
}
