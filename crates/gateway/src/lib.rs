//! The Request Gate and Terminal Proxy: the HTTP-facing half of the
//! portal. Everything that resolves a token to a username, checks
//! session ownership, or proxies a WebSocket to a container lives here.
//! The server binary is responsible only for wiring this crate's
//! [`routes::build_router`] to a listener.

pub mod auth;
pub mod directory;
pub mod error;
pub mod identity;
pub mod rate_limit_middleware;
pub mod routes;
pub mod state;
pub mod terminal_proxy;
pub mod workspace;

pub use error::ApiError;
pub use state::AppState;
