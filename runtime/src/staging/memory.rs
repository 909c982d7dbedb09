//! In-process staging store.

use crate::error::IngestError;
use crate::staging::{miss, StagingStore};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Entry {
    value: Arc<[u8]>,
    expires_at: Instant,
}

/// [`StagingStore`] held in a concurrent map. Contents are lost on restart.
#[derive(Clone, Default)]
pub struct MemoryStagingStore {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl StagingStore for MemoryStagingStore {
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), IngestError> {
        let entry = Entry {
            value: value.into(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, IngestError> {
        let entry = self.entries.get(key).ok_or_else(|| miss(key))?;
        if entry.expires_at <= Instant::now() {
            return Err(miss(key));
        }
        Ok(entry.value.to_vec())
    }

    async fn purge_expired(&self) -> Result<usize, IngestError> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        Ok(before.saturating_sub(self.entries.len()))
    }
}
