//! The single HTTP-boundary error type. Every component error enum
//! (`RegistryError`, `TokenError`/`ResolveError`, `IdentityError`,
//! `OwnershipStoreError`, ...) is translated into an `ApiError` here and
//! nowhere else; no other crate in this workspace formats an HTTP status
//! code.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use portal_registry::RegistryError;
use portal_store::ResolveError;
use serde_json::json;
use thiserror::Error;

use crate::identity::IdentityError;
use crate::workspace::WorkspaceError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("session quota exceeded")]
    QuotaExceeded,
    #[error("service temporarily unavailable: {0}")]
    Unavailable(String),
    #[error("session is pending deletion")]
    PendingDelete,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("malformed request: {0}")]
    Malformed(String),
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound => ApiError::NotFound,
            RegistryError::NotOwner => ApiError::Forbidden,
            RegistryError::PendingDelete => ApiError::PendingDelete,
            RegistryError::QuotaExceeded => ApiError::QuotaExceeded,
            RegistryError::PortsExhausted => ApiError::Unavailable("port pool exhausted".into()),
            RegistryError::ContainerStartFailed(msg) => ApiError::Unavailable(msg),
            RegistryError::EngineUnreachable => {
                ApiError::Unavailable("container engine unreachable".into())
            }
        }
    }
}

impl From<WorkspaceError> for ApiError {
    fn from(e: WorkspaceError) -> Self {
        match e {
            WorkspaceError::NotImplemented => {
                ApiError::Unavailable("workspace file collaborator not implemented".into())
            }
        }
    }
}

impl From<ResolveError> for ApiError {
    fn from(_: ResolveError) -> Self {
        ApiError::Unauthenticated
    }
}

impl From<IdentityError> for ApiError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::InvalidCredentials => ApiError::InvalidCredentials,
            IdentityError::Unavailable(msg) => ApiError::Unavailable(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::PendingDelete => StatusCode::CONFLICT,
            ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Malformed(_) => StatusCode::BAD_REQUEST,
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn quota_exceeded_maps_to_429() {
        let resp = ApiError::QuotaExceeded.into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn pending_delete_maps_to_409() {
        let resp = ApiError::PendingDelete.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn registry_not_owner_maps_to_forbidden() {
        let resp: Response = ApiError::from(RegistryError::NotOwner).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn registry_ports_exhausted_maps_to_503() {
        let resp: Response = ApiError::from(RegistryError::PortsExhausted).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
