//! Process-local opaque session token → username mapping.
//!
//! Held only in memory — a restart invalidates every token by design.
//! Tokens are minted with ≥256 bits of
//! randomness via `portal_core::crypto::mint_token`. Resolution is a
//! `DashMap` lookup, matching the O(1)-expected contract; a background
//! sweep (driven by the server binary, not this crate) periodically
//! evicts expired entries so a long-running process doesn't accumulate
//! dead tokens forever.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use portal_core::crypto::{mint_token, CryptoError};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("failed to mint token: {0}")]
    Mint(#[from] CryptoError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    Expired,
    Unknown,
}

#[derive(Debug, Clone)]
struct TokenEntry {
    username: String,
    expires_at: DateTime<Utc>,
}

/// `mint`/`resolve`/`revoke` contract over an in-memory token table.
pub struct TokenStore {
    tokens: DashMap<String, TokenEntry>,
    ttl: Duration,
}

impl TokenStore {
    pub fn new(ttl_hours: u64) -> Self {
        Self {
            tokens: DashMap::new(),
            ttl: Duration::hours(ttl_hours as i64),
        }
    }

    /// Mint a fresh token for `username`, expiring `ttl` from now.
    pub fn mint(&self, username: &str) -> Result<String, TokenError> {
        let token = mint_token()?;
        self.tokens.insert(
            token.clone(),
            TokenEntry {
                username: username.to_string(),
                expires_at: Utc::now() + self.ttl,
            },
        );
        Ok(token)
    }

    /// Resolve `token` to the username it was minted for, or an error
    /// distinguishing "never existed / already revoked" from "expired".
    pub fn resolve(&self, token: &str) -> Result<String, ResolveError> {
        match self.tokens.get(token) {
            Some(entry) if entry.expires_at > Utc::now() => Ok(entry.username.clone()),
            Some(_) => {
                drop(self.tokens.remove(token));
                Err(ResolveError::Expired)
            }
            None => Err(ResolveError::Unknown),
        }
    }

    /// Revoke `token` immediately. A no-op if the token does not exist.
    pub fn revoke(&self, token: &str) {
        self.tokens.remove(token);
    }

    /// Drop every entry whose expiry has passed. Called periodically by a
    /// background task in the server binary to bound memory.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = self
            .tokens
            .iter()
            .filter(|entry| entry.expires_at <= now)
            .map(|entry| entry.key().clone())
            .collect();
        let count = expired.len();
        for token in expired {
            self.tokens.remove(&token);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_then_resolve_roundtrips() {
        let store = TokenStore::new(24);
        let token = store.mint("alice").unwrap();
        assert_eq!(store.resolve(&token), Ok("alice".to_string()));
    }

    #[test]
    fn unknown_token_is_unknown() {
        let store = TokenStore::new(24);
        assert_eq!(store.resolve("nope"), Err(ResolveError::Unknown));
    }

    #[test]
    fn revoke_makes_token_unknown() {
        let store = TokenStore::new(24);
        let token = store.mint("alice").unwrap();
        store.revoke(&token);
        assert_eq!(store.resolve(&token), Err(ResolveError::Unknown));
    }

    #[test]
    fn expired_token_resolves_as_expired_then_unknown() {
        let store = TokenStore::new(0); // ttl of zero hours, expires immediately
        let token = store.mint("alice").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(store.resolve(&token), Err(ResolveError::Expired));
        // The first resolve evicted the entry; a second resolve reports Unknown.
        assert_eq!(store.resolve(&token), Err(ResolveError::Unknown));
    }

    #[test]
    fn sweep_expired_removes_dead_entries() {
        let store = TokenStore::new(0);
        store.mint("alice").unwrap();
        store.mint("bob").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let fresh = TokenStore::new(24);
        let live = fresh.mint("carol").unwrap();
        assert_eq!(store.sweep_expired(), 2);
        assert!(store.is_empty());
        assert_eq!(fresh.resolve(&live), Ok("carol".to_string()));
    }

    #[test]
    fn tokens_are_unique_per_mint() {
        let store = TokenStore::new(24);
        let a = store.mint("alice").unwrap();
        let b = store.mint("alice").unwrap();
        assert_ne!(a, b);
    }
}
