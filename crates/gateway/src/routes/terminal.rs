//! `/terminal/{id}` (HTML shell) and `/terminal/{id}/ws` (the bridge
//! upgrade, §4.8). Both routes run the full Request Gate before touching
//! the session; the `ws` route then acquires a Registry [`Handle`] and
//! hands it to [`crate::terminal_proxy::run_bridge`] for the life of the
//! connection.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use axum_extra::extract::cookie::CookieJar;

use crate::auth::{authenticate, require_owner};
use crate::error::ApiError;
use crate::state::AppState;
use crate::terminal_proxy::{self, TERMINAL_SUBPROTOCOL};

const TERMINAL_SHELL_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>portal — terminal</title></head>
<body>
<div id="terminal" data-session-id="__SESSION_ID__" data-ws-path="/terminal/__SESSION_ID__/ws"></div>
</body>
</html>"#;

async fn terminal_shell(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let username = authenticate(&state.tokens, &jar)?;
    let session_id: portal_core::ids::SessionId = id
        .parse()
        .map_err(|_| ApiError::Malformed("invalid session id".into()))?;
    require_owner(&state.ownership, session_id, &username)?;
    let html = TERMINAL_SHELL_TEMPLATE.replace("__SESSION_ID__", &id);
    Ok(Html(html))
}

fn client_requested_subprotocol(headers: &HeaderMap) -> Option<String> {
    headers
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

async fn terminal_ws(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let username = authenticate(&state.tokens, &jar)?;
    let session_id: portal_core::ids::SessionId = id
        .parse()
        .map_err(|_| ApiError::Malformed("invalid session id".into()))?;
    require_owner(&state.ownership, session_id, &username)?;

    let requested = client_requested_subprotocol(&headers);
    let offers_terminal_subprotocol = requested
        .as_deref()
        .map(|offered| offered.split(',').map(str::trim).any(|p| p == TERMINAL_SUBPROTOCOL))
        .unwrap_or(false);
    if !offers_terminal_subprotocol {
        return Err(ApiError::Malformed(format!(
            "client did not offer the required `{TERMINAL_SUBPROTOCOL}` subprotocol"
        )));
    }

    let handle = state.registry.acquire(session_id)?;
    let port = handle.session().port;

    let state = state.clone();
    Ok(ws
        .protocols([TERMINAL_SUBPROTOCOL])
        .on_upgrade(move |socket| async move {
            terminal_proxy::run_bridge(state, session_id, port, handle, socket).await;
        }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/terminal/{id}", get(terminal_shell))
        .route("/terminal/{id}/ws", get(terminal_ws))
}
