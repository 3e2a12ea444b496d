//! Observability layer shared by the gateway and the server binary: dual
//! human/JSON logging init, a request-id tracing middleware, and an
//! in-process Prometheus-style metrics collector.
//!
//! The portal has no external collaborator pushing metrics anywhere — this
//! exists purely so `/healthz` and the access logs carry the same
//! correlation ids and counters a production deployment would scrape.

pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod tracing_setup;
