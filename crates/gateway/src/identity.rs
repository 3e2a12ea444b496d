//! Identity Verifier: local bcrypt file first, directory service second.
//!
//! `verify` is the only entry point the rest of the gateway calls; it owns
//! the policy decision of which backend to consult (§4.3) so a handler
//! never has to know whether a given username resolved locally or via
//! LDAP.

use std::sync::Arc;

use portal_store::UserStore;

use crate::directory::{DirectoryError, DirectoryVerifier};

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("identity backend unavailable: {0}")]
    Unavailable(String),
}

impl From<DirectoryError> for IdentityError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::InvalidCredentials => IdentityError::InvalidCredentials,
            DirectoryError::Unavailable(msg) => IdentityError::Unavailable(msg),
        }
    }
}

/// Combines the local user file with an optional directory-service
/// backend. Local users are checked first; if the username is absent
/// from the local file, the directory-service path is attempted iff
/// configured and enabled (§4.3).
pub struct IdentityVerifier {
    users: Arc<UserStore>,
    directory: Option<DirectoryVerifier>,
}

impl IdentityVerifier {
    pub fn new(users: Arc<UserStore>, directory: Option<DirectoryVerifier>) -> Self {
        Self { users, directory }
    }

    pub async fn verify(&self, username: &str, password: &str) -> Result<String, IdentityError> {
        if self.users.contains(username) {
            return match self.users.verify(username, password) {
                Ok(true) => Ok(username.to_string()),
                Ok(false) => Err(IdentityError::InvalidCredentials),
                Err(e) => Err(IdentityError::Unavailable(e.to_string())),
            };
        }

        match &self.directory {
            Some(directory) => {
                directory.verify(username, password).await?;
                Ok(username.to_string())
            }
            None => Err(IdentityError::InvalidCredentials),
        }
    }

    /// Whether authentication is effectively disabled: no local users
    /// registered and no directory service configured. Used by the
    /// server binary to decide whether to bind to loopback only.
    pub fn auth_disabled(&self) -> bool {
        !self.users.has_any_users() && self.directory.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn verifier_with_local_user(username: &str, password: &str) -> IdentityVerifier {
        let dir = tempdir().unwrap();
        let users = Arc::new(UserStore::load(dir.path().join("users.json")).unwrap());
        users.create(username, password).unwrap();
        IdentityVerifier::new(users, None)
    }

    #[tokio::test]
    async fn local_user_correct_password_verifies() {
        let verifier = verifier_with_local_user("alice", "correct-password");
        assert_eq!(
            verifier.verify("alice", "correct-password").await.unwrap(),
            "alice"
        );
    }

    #[tokio::test]
    async fn local_user_wrong_password_is_invalid() {
        let verifier = verifier_with_local_user("alice", "correct-password");
        assert!(matches!(
            verifier.verify("alice", "wrong").await,
            Err(IdentityError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn unknown_user_without_directory_is_invalid() {
        let verifier = verifier_with_local_user("alice", "correct-password");
        assert!(matches!(
            verifier.verify("mallory", "whatever").await,
            Err(IdentityError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn auth_disabled_with_no_users_and_no_directory() {
        let dir = tempdir().unwrap();
        let users = Arc::new(UserStore::load(dir.path().join("users.json")).unwrap());
        let verifier = IdentityVerifier::new(users, None);
        assert!(verifier.auth_disabled());
    }

    #[tokio::test]
    async fn auth_not_disabled_once_a_local_user_exists() {
        let verifier = verifier_with_local_user("alice", "correct-password");
        assert!(!verifier.auth_disabled());
    }
}
