//! The in-memory `Session` record and its ref-count protocol.
//!
//! A session is never torn down while a request holds it. Callers obtain
//! a [`Handle`] via [`crate::session_registry::SessionRegistry::acquire`],
//! use it for the duration of one request or one terminal bridge, then
//! drop it. Teardown only actually removes the container and frees the
//! port once the last outstanding handle is gone and a delete has been
//! requested.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use portal_core::ids::SessionId;

use crate::driver::ContainerHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    Terminated,
}

/// `ref_count` and `pending_delete` live behind one lock so the
/// check-then-act sequences in [`SessionEntry::try_acquire`] and
/// [`SessionEntry::mark_pending_delete`] are mutually exclusive: neither
/// can observe the other's check stale, which is what the ref-count
/// protocol (§5) requires.
struct RefState {
    ref_count: u32,
    pending_delete: bool,
}

/// Shared, ref-counted session record. Cloning a `SessionEntry` just bumps
/// the `Arc`; the ref-count relevant to teardown lives in `ref_state`
/// below and is managed exclusively through [`Handle`].
pub struct SessionEntry {
    pub id: SessionId,
    pub username: String,
    pub port: u16,
    pub container_handle: ContainerHandle,
    pub created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    last_accessed_unix: AtomicI64,
    ref_state: Mutex<RefState>,
}

impl SessionEntry {
    pub fn new(
        id: SessionId,
        username: String,
        port: u16,
        container_handle: ContainerHandle,
    ) -> Arc<Self> {
        let now = Utc::now();
        Arc::new(Self {
            id,
            username,
            port,
            container_handle,
            created_at: now,
            state: Mutex::new(SessionState::Starting),
            last_accessed_unix: AtomicI64::new(now.timestamp()),
            ref_state: Mutex::new(RefState { ref_count: 0, pending_delete: false }),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("session state mutex poisoned")
    }

    pub fn set_state(&self, state: SessionState) {
        *self.state.lock().expect("session state mutex poisoned") = state;
    }

    pub fn touch(&self) {
        self.last_accessed_unix.store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_accessed(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_accessed_unix.load(Ordering::Relaxed), 0)
            .unwrap_or(self.created_at)
    }

    pub fn is_pending_delete(&self) -> bool {
        self.ref_state.lock().expect("ref state mutex poisoned").pending_delete
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_state.lock().expect("ref state mutex poisoned").ref_count
    }

    /// Atomically checks `pending_delete` and increments `ref_count` iff
    /// it is false, returning a single-use [`Handle`] on success. This is
    /// the only way `ref_count` is ever incremented, and it happens under
    /// the same lock [`mark_pending_delete`] uses, so a session can never
    /// be acquired after (or concurrently with) the moment it transitions
    /// into teardown.
    pub(crate) fn try_acquire(self: &Arc<Self>) -> Option<Handle> {
        let mut s = self.ref_state.lock().expect("ref state mutex poisoned");
        if s.pending_delete {
            return None;
        }
        s.ref_count += 1;
        drop(s);
        Some(Handle { entry: self.clone(), consumed: false })
    }

    /// Marks this session for deletion, unless it already was. Returns
    /// `true` iff this call both transitioned `pending_delete` to `true`
    /// *and* found `ref_count == 0` at that same instant — i.e. iff the
    /// caller should run teardown immediately. Checking the ref count
    /// under the same lock that guards `try_acquire` is what makes this
    /// decision race-free: no `acquire` can land after this call decides
    /// there are zero outstanding handles.
    pub fn mark_pending_delete(&self) -> bool {
        let mut s = self.ref_state.lock().expect("ref state mutex poisoned");
        if s.pending_delete {
            return false;
        }
        s.pending_delete = true;
        s.ref_count == 0
    }

    /// Releases one reference, reporting whether it was the last one and
    /// a delete was already pending (i.e. whether the caller should now
    /// run teardown). Used only through [`Handle`].
    fn release(&self) -> bool {
        let mut s = self.ref_state.lock().expect("ref state mutex poisoned");
        s.ref_count -= 1;
        s.ref_count == 0 && s.pending_delete
    }
}

/// A single-use reference to a live session. Dropping it (or calling
/// [`Handle::release`] explicitly) decrements the session's ref count
/// exactly once. A second release on the same handle is a programmer
/// error and is guarded against by a consumed flag rather than relying on
/// `Drop` running twice, which it can't — the flag exists so an explicit
/// `release()` followed by a drop doesn't double-decrement.
pub struct Handle {
    entry: Arc<SessionEntry>,
    consumed: bool,
}

impl Handle {
    pub fn session(&self) -> &Arc<SessionEntry> {
        &self.entry
    }

    /// Releases the reference early, reporting whether the session should
    /// now be torn down (last reference gone and a delete was requested).
    pub fn release(mut self) -> bool {
        self.release_once()
    }

    fn release_once(&mut self) -> bool {
        if self.consumed {
            return false;
        }
        self.consumed = true;
        self.entry.release()
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.release_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ContainerHandle;

    fn entry() -> Arc<SessionEntry> {
        SessionEntry::new(
            SessionId::generate().unwrap(),
            "alice".to_string(),
            20000,
            ContainerHandle("c1".to_string()),
        )
    }

    #[test]
    fn fresh_session_starts_in_starting_state() {
        let e = entry();
        assert_eq!(e.state(), SessionState::Starting);
    }

    #[test]
    fn handle_increments_and_drop_decrements_ref_count() {
        let e = entry();
        assert_eq!(e.ref_count(), 0);
        let h = e.try_acquire().unwrap();
        assert_eq!(e.ref_count(), 1);
        drop(h);
        assert_eq!(e.ref_count(), 0);
    }

    #[test]
    fn release_without_pending_delete_does_not_signal_teardown() {
        let e = entry();
        let h = e.try_acquire().unwrap();
        assert!(!h.release());
    }

    #[test]
    fn release_with_pending_delete_and_last_ref_signals_teardown() {
        let e = entry();
        let h = e.try_acquire().unwrap();
        // Ref count is 1 when the delete is marked, so teardown is
        // deferred to the eventual release, not run immediately.
        assert!(!e.mark_pending_delete());
        assert!(h.release());
    }

    #[test]
    fn second_mark_pending_delete_returns_false() {
        let e = entry();
        assert!(e.mark_pending_delete());
        assert!(!e.mark_pending_delete());
    }

    #[test]
    fn pending_delete_with_outstanding_handles_does_not_signal_until_last() {
        let e = entry();
        let h1 = e.try_acquire().unwrap();
        let h2 = e.try_acquire().unwrap();
        e.mark_pending_delete();
        assert!(!h1.release());
        assert!(h2.release());
    }

    #[test]
    fn acquire_after_pending_delete_is_refused() {
        let e = entry();
        assert!(e.mark_pending_delete());
        assert!(e.try_acquire().is_none());
    }

    #[test]
    fn mark_pending_delete_with_no_outstanding_handles_signals_teardown_now() {
        let e = entry();
        assert!(e.mark_pending_delete());
    }
}
