//! Challenge stores
//!
//! A challenge store makes HTTP-01 key authorizations fetchable by the CA.
//! The issuance flow only writes and deletes entries; the responder reads
//! them when the CA requests `/.well-known/acme-challenge/<token>`.
//!
//! Entries are keyed by challenge token, so domains validated concurrently
//! never touch the same key.

mod memory;
mod webroot;

pub use memory::MemoryStore;
pub use webroot::WebrootStore;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by challenge store backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid challenge key: {0:?}")]
    InvalidKey(String),

    #[error("Failed to write {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to delete {0}: {1}")]
    Delete(PathBuf, std::io::Error),

    #[error("Failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
}

/// Key/value publication surface for challenge responses
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Insert or replace the response served for `key`
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `key`
    ///
    /// Deleting a key that is not present logs a warning and succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Exact-match lookup, `None` when the key is unknown
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
}

/// HTTP-01 tokens are base64url strings; anything else is refused as a key
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
