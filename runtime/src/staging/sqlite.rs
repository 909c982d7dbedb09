//! Staging store in the shared SQLite database.
//!
//! Payloads survive a process restart, so a flow resumed from the journal can
//! still read what an earlier run staged, as long as the TTL has not passed.

use crate::error::IngestError;
use crate::staging::{miss, StagingStore};
use crate::storage::Database;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct SqliteStagingStore {
    db: Database,
}

impl SqliteStagingStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StagingStore for SqliteStagingStore {
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), IngestError> {
        let key = key.to_string();
        let expires_at = Utc::now().timestamp_millis() + ttl.as_millis() as i64;
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO staging (key, value, expires_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                    params![key, value, expires_at],
                )?;
                Ok(())
            })
            .await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, IngestError> {
        let lookup = key.to_string();
        let value = self
            .db
            .call(move |conn| {
                let value = conn
                    .query_row(
                        "SELECT value FROM staging WHERE key = ?1 AND expires_at > ?2",
                        params![lookup, Utc::now().timestamp_millis()],
                        |row| row.get::<_, Vec<u8>>(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await?;
        value.ok_or_else(|| miss(key))
    }

    async fn purge_expired(&self) -> Result<usize, IngestError> {
        let removed = self
            .db
            .call(|conn| {
                Ok(conn.execute(
                    "DELETE FROM staging WHERE expires_at <= ?1",
                    params![Utc::now().timestamp_millis()],
                )?)
            })
            .await?;
        debug!(removed, "purged expired staging entries");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::new_key;

    #[tokio::test]
    async fn test_payload_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest.db");
        let key = new_key();

        {
            let store = SqliteStagingStore::new(Database::open(&path).unwrap());
            store
                .put(&key, b"payload".to_vec(), Duration::from_secs(60))
                .await
                .unwrap();
        }

        let store = SqliteStagingStore::new(Database::open(&path).unwrap());
        assert_eq!(store.get(&key).await.unwrap(), b"payload");
        assert_eq!(store.get(&key).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_expired_entry_misses_and_purges() {
        let store = SqliteStagingStore::new(Database::open_in_memory().unwrap());
        let key = new_key();
        store.put(&key, vec![7], Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(
            store.get(&key).await,
            Err(IngestError::StagingMiss { .. })
        ));
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }
}
