use axum::{body::Body, extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::metrics::global_metrics;

/// Axum middleware that records per-route request metrics.
///
/// For each request it records:
/// - `http_requests_total` counter with labels `method`, `path`, `status`
/// - `http_request_duration_seconds` histogram
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let m = global_metrics();
    m.increment_counter(
        "http_requests_total",
        &[("method", &method), ("path", &path), ("status", &status)],
    );
    m.record_histogram("http_request_duration_seconds", duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn records_request_counter() {
        let app = Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(axum::middleware::from_fn(metrics_middleware));

        let req = axum::http::Request::builder()
            .uri("/ping")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);

        let count = global_metrics().get_counter(
            "http_requests_total",
            &[("method", "GET"), ("path", "/ping"), ("status", "200")],
        );
        assert!(count >= 1);
    }
}
