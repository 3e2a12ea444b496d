//! Durable and process-local state that sits below the Session Registry:
//! the Ownership Store, the Token Store, and the local user file
//! consulted by the Identity Verifier.
//!
//! None of these types know about HTTP or containers — they are narrow
//! capability sets that make the layers above them unit-testable against
//! a real on-disk store rather than a mock, since the stores themselves
//! are already cheap to stand up against a `tempfile::tempdir()`.

pub mod ownership;
pub mod token;
pub mod users;

pub use ownership::{OwnershipRecord, OwnershipStore, OwnershipStoreError};
pub use token::{ResolveError, TokenError, TokenStore};
pub use users::{LocalUser, UserStore, UserStoreError};
