//! The session identifier: a 128-bit opaque value rendered as 32 lowercase
//! hex characters (§3 of the spec). Deliberately not a UUID — the spec
//! only requires 128 bits of entropy and a stable textual form, and hex
//! keeps the type from accidentally acquiring UUID-specific semantics
//! (variant bits, version nibble) we don't need.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::{fill_random, CryptoError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId([u8; 16]);

impl SessionId {
    /// Generate a fresh id from 128 bits of OS randomness.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; 16];
        fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid session id: expected 32 hex characters")]
pub struct ParseSessionIdError;

impl FromStr for SessionId {
    type Err = ParseSessionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseSessionIdError);
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex = std::str::from_utf8(chunk).map_err(|_| ParseSessionIdError)?;
            bytes[i] = u8::from_str_radix(hex, 16).map_err(|_| ParseSessionIdError)?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl Serialize for SessionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_display_and_parse() {
        let id = SessionId::generate().unwrap();
        let rendered = id.to_string();
        assert_eq!(rendered.len(), 32);
        let parsed: SessionId = rendered.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!("abc".parse::<SessionId>().is_err());
    }

    #[test]
    fn rejects_non_hex() {
        let bad = "z".repeat(32);
        assert!(bad.parse::<SessionId>().is_err());
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = SessionId::generate().unwrap();
        let b = SessionId::generate().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn serde_roundtrip() {
        let id = SessionId::generate().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
