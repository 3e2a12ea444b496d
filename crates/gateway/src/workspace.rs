//! `WorkspaceFiles` — the seam for the upload/browse/download surface.
//!
//! Per §1, file upload/download handling is an external collaborator: out
//! of scope for this core. The route handlers in
//! [`crate::routes::files`] still exist and still pass every request
//! through the Request Gate (token + ownership), but delegate the actual
//! filesystem work to this trait object so the Gate's enforcement is
//! exercised without a real filesystem-serving implementation living in
//! this crate.

use async_trait::async_trait;
use portal_core::ids::SessionId;

#[derive(Debug, Clone, serde::Serialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("workspace collaborator not implemented")]
    NotImplemented,
}

#[async_trait]
pub trait WorkspaceFiles: Send + Sync {
    async fn browse(&self, session_id: SessionId, path: &str) -> Result<Vec<DirEntry>, WorkspaceError>;

    async fn download(&self, session_id: SessionId, path: &str) -> Result<Vec<u8>, WorkspaceError>;

    async fn upload(
        &self,
        session_id: SessionId,
        path: &str,
        data: Vec<u8>,
    ) -> Result<(), WorkspaceError>;
}

/// Default `WorkspaceFiles` wired by the server binary: every call fails
/// with `NotImplemented`, since the real implementation lives outside
/// this core per §1's scope boundary.
pub struct NullWorkspaceFiles;

#[async_trait]
impl WorkspaceFiles for NullWorkspaceFiles {
    async fn browse(&self, _session_id: SessionId, _path: &str) -> Result<Vec<DirEntry>, WorkspaceError> {
        Err(WorkspaceError::NotImplemented)
    }

    async fn download(&self, _session_id: SessionId, _path: &str) -> Result<Vec<u8>, WorkspaceError> {
        Err(WorkspaceError::NotImplemented)
    }

    async fn upload(
        &self,
        _session_id: SessionId,
        _path: &str,
        _data: Vec<u8>,
    ) -> Result<(), WorkspaceError> {
        Err(WorkspaceError::NotImplemented)
    }
}
