//! Local user file: `(username, bcrypt_hash, created_at)` records used by
//! the local half of the Identity Verifier.
//!
//! Stored as a single JSON document — unlike the Ownership Store's flat
//! line format, this uses `serde_json` the way the rest of this crate
//! family prefers for small, infrequently-written config-adjacent files.
//! Reload is
//! tolerant: a missing file means local auth has no registered users
//! (directory-service auth, if configured, still works).

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum UserStoreError {
    #[error("failed to read/write local user file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse local user file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to hash password: {0}")]
    Hash(bcrypt::BcryptError),
    #[error("user `{0}` already exists")]
    AlreadyExists(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalUser {
    pub username: String,
    pub bcrypt_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileFormat {
    users: Vec<LocalUser>,
}

/// Local half of the credential backend: bcrypt-hashed passwords in a
/// file, checked before falling through to the directory service.
pub struct UserStore {
    path: PathBuf,
    users: Mutex<HashMap<String, LocalUser>>,
}

impl UserStore {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, UserStoreError> {
        let path = path.into();
        let users = match fs::read_to_string(&path) {
            Ok(content) => {
                let parsed: FileFormat = serde_json::from_str(&content)?;
                parsed
                    .users
                    .into_iter()
                    .map(|u| (u.username.clone(), u))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            users: Mutex::new(users),
        })
    }

    /// Whether this store has any user file configured and loaded users
    /// present (not whether a specific username exists).
    pub fn has_any_users(&self) -> bool {
        !self.users.lock().expect("user store mutex poisoned").is_empty()
    }

    pub fn create(&self, username: &str, password: &str) -> Result<(), UserStoreError> {
        let bcrypt_hash = hash(password, DEFAULT_COST).map_err(UserStoreError::Hash)?;
        let record = LocalUser {
            username: username.to_string(),
            bcrypt_hash,
            created_at: Utc::now(),
        };
        let snapshot = {
            let mut guard = self.users.lock().expect("user store mutex poisoned");
            if guard.contains_key(username) {
                return Err(UserStoreError::AlreadyExists(username.to_string()));
            }
            guard.insert(username.to_string(), record);
            guard.values().cloned().collect::<Vec<_>>()
        };
        self.flush(&snapshot)
    }

    /// Look up a user record without checking the password — used to
    /// decide whether the directory-service path should even be tried.
    /// Local users are checked first; if the username is absent locally,
    /// the directory-service path is attempted.
    pub fn contains(&self, username: &str) -> bool {
        self.users
            .lock()
            .expect("user store mutex poisoned")
            .contains_key(username)
    }

    /// Verify `password` against the stored bcrypt hash for `username`.
    /// Returns `Ok(false)` (not an error) for a non-matching password or
    /// an unknown username — the caller (Identity Verifier) is
    /// responsible for mapping that to `InvalidCredentials`.
    pub fn verify(&self, username: &str, password: &str) -> Result<bool, UserStoreError> {
        let hash_opt = {
            let guard = self.users.lock().expect("user store mutex poisoned");
            guard.get(username).map(|u| u.bcrypt_hash.clone())
        };
        match hash_opt {
            Some(stored_hash) => verify(password, &stored_hash).map_err(UserStoreError::Hash),
            None => Ok(false),
        }
    }

    fn flush(&self, users: &[LocalUser]) -> Result<(), UserStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut sorted = users.to_vec();
        sorted.sort_by(|a, b| a.username.cmp(&b.username));
        let tmp_path = self.path.with_extension("tmp");
        let content = serde_json::to_string_pretty(&FileFormat { users: sorted })?;
        fs::write(&tmp_path, content)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_verify_correct_password() {
        let dir = tempdir().unwrap();
        let store = UserStore::load(dir.path().join("users.json")).unwrap();
        store.create("alice", "correct-password").unwrap();
        assert!(store.verify("alice", "correct-password").unwrap());
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let dir = tempdir().unwrap();
        let store = UserStore::load(dir.path().join("users.json")).unwrap();
        store.create("alice", "correct-password").unwrap();
        assert!(!store.verify("alice", "wrong-password").unwrap());
    }

    #[test]
    fn verify_unknown_user_returns_false_not_error() {
        let dir = tempdir().unwrap();
        let store = UserStore::load(dir.path().join("users.json")).unwrap();
        assert!(!store.verify("nobody", "whatever").unwrap());
    }

    #[test]
    fn duplicate_create_fails() {
        let dir = tempdir().unwrap();
        let store = UserStore::load(dir.path().join("users.json")).unwrap();
        store.create("alice", "pw1").unwrap();
        assert!(matches!(
            store.create("alice", "pw2"),
            Err(UserStoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn reload_after_restart_preserves_users() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.json");
        {
            let store = UserStore::load(&path).unwrap();
            store.create("alice", "correct-password").unwrap();
        }
        let reloaded = UserStore::load(&path).unwrap();
        assert!(reloaded.contains("alice"));
        assert!(reloaded.verify("alice", "correct-password").unwrap());
    }

    #[test]
    fn missing_file_starts_with_no_users() {
        let dir = tempdir().unwrap();
        let store = UserStore::load(dir.path().join("nonexistent.json")).unwrap();
        assert!(!store.has_any_users());
    }
}
