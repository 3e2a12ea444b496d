//! Cross-cutting ambient infrastructure shared by the gateway and the
//! registry: rate limiting, graceful shutdown coordination, and a
//! circuit breaker for the (external, unreliable) container engine.
//!
//! None of this is domain logic — it is the scaffolding any production
//! service in this lineage carries regardless of which features a given
//! spec declares out of scope.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod shutdown;
