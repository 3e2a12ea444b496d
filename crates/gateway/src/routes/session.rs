//! `/session/new`, `/session/{id}`, `/session/{id}/status`, and the
//! batch `/sessions/status` lookup (§6). Every route here that targets a
//! specific `session_id` runs both halves of the Request Gate:
//! [`authenticate`] then [`require_owner`].

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use portal_core::ids::SessionId;
use portal_registry::SessionState;
use serde::{Deserialize, Serialize};

use crate::auth::{authenticate, require_owner};
use crate::error::ApiError;
use crate::state::AppState;

fn state_label(state: SessionState) -> &'static str {
    match state {
        SessionState::Starting => "starting",
        SessionState::Running => "running",
        SessionState::Terminated => "gone",
    }
}

#[derive(Debug, Serialize)]
struct NewSessionResponse {
    id: SessionId,
}

async fn create_session(
    State(state): State<AppStateHandle>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let username = authenticate(&state.tokens, &jar)?;
    let id = state.registry.create(&username).await?;
    Ok((StatusCode::OK, Json(NewSessionResponse { id })))
}

async fn delete_session(
    State(state): State<AppStateHandle>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let username = authenticate(&state.tokens, &jar)?;
    let id = parse_session_id(&id)?;
    require_owner(&state.ownership, id, &username)?;
    state.registry.delete(id, &username).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct SessionStatusResponse {
    state: &'static str,
    created_at: DateTime<Utc>,
}

async fn session_status(
    State(state): State<AppStateHandle>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let username = authenticate(&state.tokens, &jar)?;
    let id = parse_session_id(&id)?;
    require_owner(&state.ownership, id, &username)?;
    let entry = state.registry.get(id)?;
    Ok(Json(SessionStatusResponse {
        state: state_label(entry.state()),
        created_at: entry.created_at,
    }))
}

#[derive(Debug, Deserialize)]
struct BatchStatusRequest {
    session_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct BatchStatusEntry {
    status: &'static str,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct BatchStatusResponse {
    sessions: HashMap<String, BatchStatusEntry>,
}

async fn batch_session_status(
    State(state): State<AppStateHandle>,
    jar: CookieJar,
    Json(body): Json<BatchStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = authenticate(&state.tokens, &jar)?;
    let mut sessions = HashMap::with_capacity(body.session_ids.len());
    for raw_id in body.session_ids {
        let entry = SessionId::from_str(&raw_id)
            .ok()
            .filter(|id| state.ownership.get(*id).as_deref() == Some(username.as_str()))
            .and_then(|id| state.registry.get(id).ok());
        let value = match entry {
            Some(entry) => BatchStatusEntry {
                status: state_label(entry.state()),
                created_at: Some(entry.created_at),
            },
            None => BatchStatusEntry {
                status: "gone",
                created_at: None,
            },
        };
        sessions.insert(raw_id, value);
    }
    Ok(Json(BatchStatusResponse { sessions }))
}

fn parse_session_id(raw: &str) -> Result<SessionId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::Malformed("invalid session id".into()))
}

type AppStateHandle = Arc<AppState>;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/session/new", post(create_session))
        .route(
            "/session/{id}",
            axum::routing::delete(delete_session),
        )
        .route("/session/{id}/status", get(session_status))
        .route("/sessions/status", post(batch_session_status))
}
