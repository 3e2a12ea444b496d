//! Cryptographically secure randomness for session ids and tokens.
//!
//! Session ids need 128 bits of entropy (§9 of the spec); tokens need at
//! least 256 bits, URL-safe. Both are generated from the same OS-backed
//! random source rather than `rand`'s userspace PRNGs, mirroring how the
//! rest of this codebase family sources randomness for anything
//! security-sensitive.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroize;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("failed to generate random bytes")]
    RandomGeneration,
}

/// Fill `buf` with cryptographically secure random bytes.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    SystemRandom::new()
        .fill(buf)
        .map_err(|_| CryptoError::RandomGeneration)
}

/// Generate `n` random bytes, zeroized on drop of the intermediate buffer
/// once encoded (the returned `String` is the opaque token itself and is
/// not a secret we can zeroize without also invalidating it for the
/// caller).
pub fn random_url_safe_token(n_bytes: usize) -> Result<String, CryptoError> {
    let mut bytes = vec![0u8; n_bytes];
    fill_random(&mut bytes)?;
    let token = URL_SAFE_NO_PAD.encode(&bytes);
    bytes.zeroize();
    Ok(token)
}

/// 256 bits of randomness, URL-safe encoded — the minimum token entropy
/// required by the spec.
pub fn mint_token() -> Result<String, CryptoError> {
    random_url_safe_token(32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_token_is_url_safe_and_long_enough() {
        let token = mint_token().unwrap();
        assert!(token.len() >= 32);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn tokens_are_unique() {
        let a = mint_token().unwrap();
        let b = mint_token().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn fill_random_fills_entire_buffer() {
        let mut buf = [0u8; 16];
        fill_random(&mut buf).unwrap();
        assert!(buf.iter().any(|&b| b != 0));
    }
}
