//! Durable session_id → username mapping.
//!
//! The on-disk format is a flat key-value file, one record per line
//! (`session_id<TAB>username<TAB>created_at_rfc3339`). The in-memory
//! index is protected by a single mutex; every mutation
//! recomputes a full snapshot and rewrites it to a temp file before an
//! atomic rename, so a reader never observes a partially written file —
//! the same write-to-temp-then-rename discipline `DaemonLockfile` already
//! uses for its own atomic writes.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use portal_core::ids::SessionId;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum OwnershipStoreError {
    #[error("failed to write ownership store to disk: {0}")]
    Io(#[from] std::io::Error),
}

/// `(session_id, username, created_at)` — immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipRecord {
    pub session_id: SessionId,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

struct Inner {
    records: HashMap<SessionId, OwnershipRecord>,
}

/// Durable mapping of session-id → owning-username.
///
/// All operations are serialized through a single mutex; the on-disk
/// rewrite happens outside that lock so a slow fsync never blocks an
/// in-memory `get`.
pub struct OwnershipStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl OwnershipStore {
    /// Load the store from `path`, tolerating a missing file (fresh start)
    /// and dropping malformed lines with a warning rather than failing
    /// the whole load.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, OwnershipStoreError> {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(content) => parse_records(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            inner: Mutex::new(Inner { records }),
        })
    }

    /// Record `(session_id, username)` with the current time as
    /// `created_at`, then flush to disk.
    pub fn put(&self, session_id: SessionId, username: &str) -> Result<(), OwnershipStoreError> {
        let record = OwnershipRecord {
            session_id,
            username: username.to_string(),
            created_at: Utc::now(),
        };
        let snapshot = {
            let mut guard = self.inner.lock().expect("ownership store mutex poisoned");
            guard.records.insert(session_id, record);
            snapshot(&guard.records)
        };
        self.flush(&snapshot)
    }

    pub fn get(&self, session_id: SessionId) -> Option<String> {
        let guard = self.inner.lock().expect("ownership store mutex poisoned");
        guard.records.get(&session_id).map(|r| r.username.clone())
    }

    /// Remove the record for `session_id`, flushing to disk. A no-op
    /// (and `Ok`) if the record is already absent — teardown must be
    /// idempotent.
    pub fn remove(&self, session_id: SessionId) -> Result<(), OwnershipStoreError> {
        let snapshot = {
            let mut guard = self.inner.lock().expect("ownership store mutex poisoned");
            guard.records.remove(&session_id);
            snapshot(&guard.records)
        };
        self.flush(&snapshot)
    }

    pub fn list_by_user(&self, username: &str) -> Vec<SessionId> {
        let guard = self.inner.lock().expect("ownership store mutex poisoned");
        guard
            .records
            .values()
            .filter(|r| r.username == username)
            .map(|r| r.session_id)
            .collect()
    }

    fn flush(&self, records: &[OwnershipRecord]) -> Result<(), OwnershipStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path)?;
        for record in records {
            writeln!(
                file,
                "{}\t{}\t{}",
                record.session_id,
                record.username,
                record.created_at.to_rfc3339()
            )?;
        }
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn snapshot(records: &HashMap<SessionId, OwnershipRecord>) -> Vec<OwnershipRecord> {
    let mut v: Vec<OwnershipRecord> = records.values().cloned().collect();
    v.sort_by_key(|r| r.session_id);
    v
}

fn parse_records(content: &str) -> HashMap<SessionId, OwnershipRecord> {
    let mut map = HashMap::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut parts = line.splitn(3, '\t');
        let parsed = (|| {
            let id_str = parts.next()?;
            let username = parts.next()?;
            let created_at_str = parts.next()?;
            let session_id: SessionId = id_str.parse().ok()?;
            let created_at = DateTime::parse_from_rfc3339(created_at_str)
                .ok()?
                .with_timezone(&Utc);
            Some(OwnershipRecord {
                session_id,
                username: username.to_string(),
                created_at,
            })
        })();
        match parsed {
            Some(record) => {
                map.insert(record.session_id, record);
            }
            None => warn!(line = lineno, "dropping malformed ownership store record"),
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_then_get_roundtrips() {
        let dir = tempdir().unwrap();
        let store = OwnershipStore::load(dir.path().join("ownership.db")).unwrap();
        let id = SessionId::generate().unwrap();
        store.put(id, "alice").unwrap();
        assert_eq!(store.get(id), Some("alice".to_string()));
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = OwnershipStore::load(dir.path().join("ownership.db")).unwrap();
        let id = SessionId::generate().unwrap();
        store.put(id, "alice").unwrap();
        store.remove(id).unwrap();
        store.remove(id).unwrap();
        assert_eq!(store.get(id), None);
    }

    #[test]
    fn reload_after_restart_yields_same_get() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ownership.db");
        let id = SessionId::generate().unwrap();
        {
            let store = OwnershipStore::load(&path).unwrap();
            store.put(id, "bob").unwrap();
        }
        let reloaded = OwnershipStore::load(&path).unwrap();
        assert_eq!(reloaded.get(id), Some("bob".to_string()));
    }

    #[test]
    fn list_by_user_filters_correctly() {
        let dir = tempdir().unwrap();
        let store = OwnershipStore::load(dir.path().join("ownership.db")).unwrap();
        let a1 = SessionId::generate().unwrap();
        let a2 = SessionId::generate().unwrap();
        let b1 = SessionId::generate().unwrap();
        store.put(a1, "alice").unwrap();
        store.put(a2, "alice").unwrap();
        store.put(b1, "bob").unwrap();
        let mut alice_sessions = store.list_by_user("alice");
        alice_sessions.sort();
        let mut expected = vec![a1, a2];
        expected.sort();
        assert_eq!(alice_sessions, expected);
    }

    #[test]
    fn malformed_lines_are_dropped_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ownership.db");
        fs::write(&path, "not-a-valid-line\n").unwrap();
        let store = OwnershipStore::load(&path).unwrap();
        assert_eq!(store.list_by_user("anyone").len(), 0);
    }

    #[test]
    fn load_missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let store = OwnershipStore::load(dir.path().join("nonexistent.db")).unwrap();
        assert_eq!(store.list_by_user("alice").len(), 0);
    }
}
