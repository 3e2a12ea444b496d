//! The Request Gate (§4.7): the only place in this workspace that
//! resolves a token cookie to a username or checks session ownership.
//! Every handler that targets a specific `session_id` calls
//! [`require_owner`] after extracting the authenticated username; no
//! other component is permitted to expose a session by id without going
//! through both steps.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use portal_core::ids::SessionId;
use portal_store::{OwnershipStore, ResolveError, TokenStore};

use crate::error::ApiError;

pub const SESSION_COOKIE: &str = "portal_session";

/// Resolve the session-token cookie on `jar` to an authenticated
/// username. The only error variant is `ApiError::Unauthenticated`,
/// matching §7's taxonomy for missing or expired tokens.
pub fn authenticate(tokens: &TokenStore, jar: &CookieJar) -> Result<String, ApiError> {
    let token = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or(ApiError::Unauthenticated)?;
    tokens
        .resolve(&token)
        .map_err(|e: ResolveError| match e {
            ResolveError::Expired | ResolveError::Unknown => ApiError::Unauthenticated,
        })
}

/// Verify that `username` owns `session_id` per the Ownership Store.
/// This is the second half of the two-level check every
/// `/session/{id}*` and `/terminal/{id}*` route performs (§4.7).
pub fn require_owner(
    ownership: &OwnershipStore,
    session_id: SessionId,
    username: &str,
) -> Result<(), ApiError> {
    match ownership.get(session_id) {
        Some(owner) if owner == username => Ok(()),
        Some(_) => Err(ApiError::Forbidden),
        None => Err(ApiError::NotFound),
    }
}

/// Build the `Set-Cookie` header value for a freshly minted session
/// token. `HttpOnly` and `SameSite=Strict` always; `Secure` iff the
/// server is configured as sitting behind a TLS-terminating proxy (§6).
pub fn session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(secure)
        .path("/")
        .build()
}

/// Build the cookie that clears the client's session token on logout.
pub fn expired_session_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(secure)
        .path("/")
        .max_age(time::Duration::ZERO)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticate_without_cookie_is_unauthenticated() {
        let tokens = TokenStore::new(24);
        let jar = CookieJar::new();
        assert!(matches!(
            authenticate(&tokens, &jar),
            Err(ApiError::Unauthenticated)
        ));
    }

    #[test]
    fn authenticate_with_valid_cookie_resolves_username() {
        let tokens = TokenStore::new(24);
        let token = tokens.mint("alice").unwrap();
        let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE, token));
        assert_eq!(authenticate(&tokens, &jar).unwrap(), "alice");
    }

    #[test]
    fn authenticate_with_unknown_token_is_unauthenticated() {
        let tokens = TokenStore::new(24);
        let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE, "bogus"));
        assert!(matches!(
            authenticate(&tokens, &jar),
            Err(ApiError::Unauthenticated)
        ));
    }

    #[test]
    fn require_owner_matches_owner() {
        let dir = tempfile::tempdir().unwrap();
        let ownership = OwnershipStore::load(dir.path().join("o.tsv")).unwrap();
        let id = SessionId::generate().unwrap();
        ownership.put(id, "alice").unwrap();
        assert!(require_owner(&ownership, id, "alice").is_ok());
    }

    #[test]
    fn require_owner_rejects_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let ownership = OwnershipStore::load(dir.path().join("o.tsv")).unwrap();
        let id = SessionId::generate().unwrap();
        ownership.put(id, "alice").unwrap();
        assert!(matches!(
            require_owner(&ownership, id, "bob"),
            Err(ApiError::Forbidden)
        ));
    }

    #[test]
    fn require_owner_rejects_missing_session() {
        let dir = tempfile::tempdir().unwrap();
        let ownership = OwnershipStore::load(dir.path().join("o.tsv")).unwrap();
        let id = SessionId::generate().unwrap();
        assert!(matches!(
            require_owner(&ownership, id, "alice"),
            Err(ApiError::NotFound)
        ));
    }
}
