//! Shared application state handed to every Axum handler.
//!
//! Mirrors the `ApiState` pattern this codebase family already uses for
//! its HTTP layer: one `Arc<AppState>` threaded through the router via
//! `State`, with each field itself independently `Arc`'d so a handler can
//! clone out just the piece it needs (notably the Registry handle used by
//! the terminal bridge, which must outlive the request that created it).

use std::sync::Arc;

use portal_core::config::Config;
use portal_harness::rate_limiter::{MultiKeyRateLimiter, RateLimitConfig};
use portal_harness::shutdown::ShutdownSignal;
use portal_registry::SessionRegistry;
use portal_store::{OwnershipStore, TokenStore};

use crate::identity::IdentityVerifier;
use crate::workspace::WorkspaceFiles;

pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub ownership: Arc<OwnershipStore>,
    pub tokens: Arc<TokenStore>,
    pub identity: Arc<IdentityVerifier>,
    pub workspace_files: Arc<dyn WorkspaceFiles>,
    pub rate_limiter: Arc<MultiKeyRateLimiter>,
    pub shutdown: ShutdownSignal,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<SessionRegistry>,
        ownership: Arc<OwnershipStore>,
        tokens: Arc<TokenStore>,
        identity: Arc<IdentityVerifier>,
        workspace_files: Arc<dyn WorkspaceFiles>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let rate_limiter = Arc::new(MultiKeyRateLimiter::new(
            RateLimitConfig::per_second(200),
            RateLimitConfig::per_minute(120),
            RateLimitConfig::per_second(50),
        ));
        Self {
            config,
            registry,
            ownership,
            tokens,
            identity,
            workspace_files,
            rate_limiter,
            shutdown,
        }
    }
}
