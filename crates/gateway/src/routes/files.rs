//! `/session/{id}/upload|browse|download` — external-collaborator stubs
//! (§1, §6). These routes still run the full Request Gate; only the
//! filesystem work itself is delegated to [`crate::workspace::WorkspaceFiles`].

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use crate::auth::{authenticate, require_owner};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct PathQuery {
    path: String,
}

async fn browse(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let username = authenticate(&state.tokens, &jar)?;
    let session_id: portal_core::ids::SessionId = id
        .parse()
        .map_err(|_| ApiError::Malformed("invalid session id".into()))?;
    require_owner(&state.ownership, session_id, &username)?;
    let entries = state.workspace_files.browse(session_id, &query.path).await?;
    Ok(Json(entries))
}

async fn download(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let username = authenticate(&state.tokens, &jar)?;
    let session_id: portal_core::ids::SessionId = id
        .parse()
        .map_err(|_| ApiError::Malformed("invalid session id".into()))?;
    require_owner(&state.ownership, session_id, &username)?;
    let bytes = state.workspace_files.download(session_id, &query.path).await?;
    Ok(bytes)
}

async fn upload(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let username = authenticate(&state.tokens, &jar)?;
    let session_id: portal_core::ids::SessionId = id
        .parse()
        .map_err(|_| ApiError::Malformed("invalid session id".into()))?;
    require_owner(&state.ownership, session_id, &username)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Malformed(e.to_string()))?
    {
        let path = field.file_name().unwrap_or("upload").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))?;
        state
            .workspace_files
            .upload(session_id, &path, data.to_vec())
            .await?;
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/session/{id}/browse", get(browse))
        .route("/session/{id}/download", get(download))
        .route("/session/{id}/upload", post(upload))
}
