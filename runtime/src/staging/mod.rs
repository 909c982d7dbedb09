//! Transient key-value staging for parsed payloads.
//!
//! The fetch step writes its parsed entries under a fresh key and the persist
//! step reads them back by key, so large payloads never travel through the
//! flow journal. Entries expire after their TTL; reads never consume them.

pub mod memory;
pub mod sqlite;

use crate::error::IngestError;
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

pub use memory::MemoryStagingStore;
pub use sqlite::SqliteStagingStore;

/// How long a staged payload stays readable.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

const KEY_PREFIX: &str = "staging:";

/// Expiring key-value store.
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Store `value` under `key` until `ttl` elapses.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), IngestError>;

    /// Read the value under `key`. Missing and expired keys are both
    /// [`IngestError::StagingMiss`].
    async fn get(&self, key: &str) -> Result<Vec<u8>, IngestError>;

    /// Drop expired entries, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize, IngestError>;
}

/// A fresh `staging:<uuid>` key.
pub fn new_key() -> String {
    format!("{KEY_PREFIX}{}", Uuid::new_v4())
}

pub(crate) fn miss(key: &str) -> IngestError {
    IngestError::StagingMiss {
        key: key.to_string(),
    }
}
