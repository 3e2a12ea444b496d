//! Authoritative in-memory table of live sessions: enforces the per-user
//! concurrency cap and the reference-count protocol that guards deletion.
//!
//! `create` is a multi-step provisioning pipeline where each step
//! compensates the previous one on failure, so a crash or early return
//! never leaves a dangling port, container, or ownership record. `delete`
//! never blocks on an in-flight bridge: it flips `pending_delete` and
//! either tears down immediately (no outstanding handles) or relies on
//! the last `Handle::release` to do it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use portal_core::ids::SessionId;
use portal_store::OwnershipStore;
use tracing::{info, warn};

use crate::driver::{ContainerDriver, CreateParams, DriverError};
use crate::port_allocator::{PortAllocator, PortAllocatorError};
use crate::session::{Handle, SessionEntry, SessionState};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("session not found")]
    NotFound,
    #[error("requester does not own this session")]
    NotOwner,
    #[error("session is pending deletion")]
    PendingDelete,
    #[error("user has reached the session quota")]
    QuotaExceeded,
    #[error("port pool exhausted")]
    PortsExhausted,
    #[error("container failed to start: {0}")]
    ContainerStartFailed(String),
    #[error("container engine unreachable")]
    EngineUnreachable,
}

impl From<PortAllocatorError> for RegistryError {
    fn from(_: PortAllocatorError) -> Self {
        RegistryError::PortsExhausted
    }
}

impl From<DriverError> for RegistryError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::EngineUnreachable => RegistryError::EngineUnreachable,
            DriverError::ContainerStartFailed(m) => RegistryError::ContainerStartFailed(m),
            DriverError::Timeout => {
                RegistryError::ContainerStartFailed("terminal daemon never became ready".into())
            }
        }
    }
}

pub struct SessionRegistryConfig {
    pub max_sessions_per_user: u32,
    pub ready_timeout: Duration,
    pub container_image: String,
    pub container_memory_mb: u64,
    pub container_cpu_quota: f64,
    pub workspace_root: String,
}

struct Inner {
    sessions: HashMap<SessionId, Arc<SessionEntry>>,
}

pub struct SessionRegistry {
    config: SessionRegistryConfig,
    ports: PortAllocator,
    ownership: Arc<OwnershipStore>,
    driver: Arc<dyn ContainerDriver>,
    inner: StdMutex<Inner>,
}

impl SessionRegistry {
    pub fn new(
        config: SessionRegistryConfig,
        ports: PortAllocator,
        ownership: Arc<OwnershipStore>,
        driver: Arc<dyn ContainerDriver>,
    ) -> Self {
        Self {
            config,
            ports,
            ownership,
            driver,
            inner: StdMutex::new(Inner { sessions: HashMap::new() }),
        }
    }

    fn count_for_user(&self, username: &str) -> u32 {
        self.inner
            .lock()
            .expect("registry mutex poisoned")
            .sessions
            .values()
            .filter(|s| s.username == username)
            .count() as u32
    }

    /// Provision a new session for `username`. Each step compensates the
    /// previous one on failure so no port, container, or ownership record
    /// is left dangling.
    pub async fn create(&self, username: &str) -> Result<SessionId, RegistryError> {
        if self.count_for_user(username) >= self.config.max_sessions_per_user {
            return Err(RegistryError::QuotaExceeded);
        }

        let port = self.ports.allocate()?;

        let session_id =
            SessionId::generate().map_err(|_| RegistryError::ContainerStartFailed(
                "failed to generate session id".into(),
            ))?;
        let params = CreateParams {
            session_id: session_id.to_string(),
            image: self.config.container_image.clone(),
            host_port: port,
            memory_mb: self.config.container_memory_mb,
            cpu_quota: self.config.container_cpu_quota,
            hostname: format!("session-{session_id}"),
            workspace_mount: format!("{}/{}", self.config.workspace_root, session_id),
            env: HashMap::new(),
        };

        let container_handle = match self.driver.create_and_start(params).await {
            Ok(h) => h,
            Err(e) => {
                self.ports.release(port);
                return Err(e.into());
            }
        };

        if let Err(e) = self
            .driver
            .await_ready(port, self.config.ready_timeout)
            .await
        {
            let _ = self.driver.remove(&container_handle).await;
            self.ports.release(port);
            return Err(e.into());
        }

        if let Err(e) = self.ownership.put(session_id, username) {
            let _ = self.driver.remove(&container_handle).await;
            self.ports.release(port);
            return Err(RegistryError::ContainerStartFailed(format!(
                "failed to record ownership: {e}"
            )));
        }

        let entry = SessionEntry::new(session_id, username.to_string(), port, container_handle);
        entry.set_state(SessionState::Running);

        self.inner
            .lock()
            .expect("registry mutex poisoned")
            .sessions
            .insert(session_id, entry);

        info!(%session_id, username, port, "session created");
        Ok(session_id)
    }

    pub fn get(&self, id: SessionId) -> Result<Arc<SessionEntry>, RegistryError> {
        self.inner
            .lock()
            .expect("registry mutex poisoned")
            .sessions
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound)
    }

    /// Atomically increments the reference count iff the session exists
    /// and is not pending deletion. The pending-delete check and the
    /// increment happen under [`SessionEntry`]'s own lock (see
    /// `try_acquire`), which is the same lock `delete`'s teardown
    /// decision is made under — the two can never interleave, so a
    /// handle is never handed out for a session whose teardown has
    /// already been decided.
    pub fn acquire(&self, id: SessionId) -> Result<Handle, RegistryError> {
        let entry = self.get(id)?;
        let handle = entry.try_acquire().ok_or(RegistryError::PendingDelete)?;
        entry.touch();
        Ok(handle)
    }

    /// Marks the session for deletion. If no handles are outstanding,
    /// tears down immediately; otherwise the last `Handle::release` will
    /// trigger it. Idempotent: a second `delete` on an already-deleted or
    /// already-pending session returns `NotFound` without side effects.
    pub async fn delete(&self, id: SessionId, requester: &str) -> Result<(), RegistryError> {
        let entry = self.get(id)?;
        if entry.username != requester {
            return Err(RegistryError::NotOwner);
        }
        let should_teardown_now = entry.mark_pending_delete();
        if should_teardown_now {
            self.teardown(&entry).await;
        }
        Ok(())
    }

    /// Invoked by the owner of the last released [`Handle`] when that
    /// release indicated teardown should proceed.
    pub async fn teardown_if_signalled(&self, id: SessionId, signalled: bool) {
        if !signalled {
            return;
        }
        if let Ok(entry) = self.get(id) {
            self.teardown(&entry).await;
        }
    }

    /// Idempotent teardown: stop+remove container, release port, remove
    /// ownership record, remove registry entry. Safe to call more than
    /// once for the same session (e.g. if a caller retries).
    async fn teardown(&self, entry: &Arc<SessionEntry>) {
        entry.set_state(SessionState::Terminated);
        if let Err(e) = self.driver.remove(&entry.container_handle).await {
            warn!(session_id = %entry.id, error = %e, "failed to remove container during teardown");
        }
        self.ports.release(entry.port);
        if let Err(e) = self.ownership.remove(entry.id) {
            warn!(session_id = %entry.id, error = %e, "failed to remove ownership record during teardown");
        }
        self.inner
            .lock()
            .expect("registry mutex poisoned")
            .sessions
            .remove(&entry.id);
        info!(session_id = %entry.id, "session torn down");
    }

    /// Consistent snapshot of every live session owned by `username`.
    pub fn sessions_for(&self, username: &str) -> Vec<Arc<SessionEntry>> {
        self.inner
            .lock()
            .expect("registry mutex poisoned")
            .sessions
            .values()
            .filter(|s| s.username == username)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry mutex poisoned").sessions.len()
    }

    /// Passthrough used by `/readyz`: whether the container engine itself
    /// answers, independent of any particular session.
    pub async fn engine_reachable(&self) -> bool {
        self.driver.engine_reachable().await
    }
}
