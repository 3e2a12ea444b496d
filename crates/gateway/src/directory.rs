//! Directory-service (LDAP) half of the Identity Verifier: bind as a
//! service account, search for the user, bind as that entry with the
//! submitted password, optionally verify group membership with a second
//! search. Every network step carries its own timeout.

use std::time::Duration;

use ldap3::{LdapConnAsync, Scope, SearchEntry};
use portal_core::config::DirectoryServiceConfig;
use tokio::time::timeout;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory service unavailable: {0}")]
    Unavailable(String),
    #[error("invalid credentials")]
    InvalidCredentials,
}

pub struct DirectoryVerifier {
    url: String,
    bind_dn: String,
    bind_password: String,
    user_base: String,
    user_filter: String,
    group_base: Option<String>,
    group_filter: Option<String>,
    step_timeout: Duration,
}

impl DirectoryVerifier {
    /// Returns `None` if the configuration is missing required fields —
    /// callers should treat that the same as directory auth being
    /// disabled, since `Config::validate()` already rejects a malformed
    /// filter at startup.
    pub fn from_config(config: &DirectoryServiceConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        Some(Self {
            url: config.url.clone()?,
            bind_dn: config.bind_dn.clone()?,
            bind_password: config.bind_password.clone()?,
            user_base: config.user_base.clone()?,
            user_filter: config.user_filter.clone()?,
            group_base: config.group_base.clone(),
            group_filter: config.group_filter.clone(),
            step_timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    pub async fn verify(&self, username: &str, password: &str) -> Result<(), DirectoryError> {
        let (conn, mut ldap) = timeout(self.step_timeout, LdapConnAsync::new(&self.url))
            .await
            .map_err(|_| DirectoryError::Unavailable("connect timed out".into()))?
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        ldap3::drive!(conn);

        timeout(
            self.step_timeout,
            ldap.simple_bind(&self.bind_dn, &self.bind_password),
        )
        .await
        .map_err(|_| DirectoryError::Unavailable("service bind timed out".into()))?
        .map_err(|e| DirectoryError::Unavailable(e.to_string()))?
        .success()
        .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        let filter = self.user_filter.replace("{username}", username);
        let (results, _) = timeout(
            self.step_timeout,
            ldap.search(&self.user_base, Scope::Subtree, &filter, vec!["dn"]),
        )
        .await
        .map_err(|_| DirectoryError::Unavailable("user search timed out".into()))?
        .map_err(|e| DirectoryError::Unavailable(e.to_string()))?
        .success()
        .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        if results.len() != 1 {
            return Err(DirectoryError::InvalidCredentials);
        }
        let entry = SearchEntry::construct(results.into_iter().next().unwrap());
        let user_dn = entry.dn;

        let bind_result = timeout(self.step_timeout, ldap.simple_bind(&user_dn, password))
            .await
            .map_err(|_| DirectoryError::Unavailable("user bind timed out".into()))?
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        if bind_result.success().is_err() {
            return Err(DirectoryError::InvalidCredentials);
        }

        if let (Some(group_base), Some(group_filter)) = (&self.group_base, &self.group_filter) {
            let filter = group_filter
                .replace("{username}", username)
                .replace("{user_dn}", &user_dn);
            let (group_results, _) = timeout(
                self.step_timeout,
                ldap.search(group_base, Scope::Subtree, &filter, vec!["dn"]),
            )
            .await
            .map_err(|_| DirectoryError::Unavailable("group search timed out".into()))?
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?
            .success()
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
            if group_results.is_empty() {
                return Err(DirectoryError::InvalidCredentials);
            }
        }

        if let Err(e) = ldap.unbind().await {
            warn!(error = %e, "failed to cleanly unbind from directory service");
        }

        Ok(())
    }
}
