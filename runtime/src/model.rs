//! Persisted record types.
//!
//! Records are created once during ingestion and never updated here;
//! `scraped` is flipped by the downstream indexer.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One fetched robots.txt body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotsRecord {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub upload_id: Uuid,
    pub data: String,
    pub scraped: bool,
}

impl RobotsRecord {
    pub fn new(id: Uuid, entity_id: Uuid, upload_id: Uuid, data: String) -> Self {
        Self {
            id,
            entity_id,
            upload_id,
            data,
            scraped: false,
        }
    }
}

/// A child sitemap listed by an index document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitemapIndexRecord {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub upload_id: Uuid,
    pub robots_id: Uuid,
    /// The index record whose document listed this one; `None` at the root.
    pub origin_id: Option<Uuid>,
    pub url: String,
    /// Epoch milliseconds, `None` when unknown.
    pub last_modified: Option<i64>,
    pub scraped: bool,
}

/// A leaf page listed by a urlset document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitemapUrlsetRecord {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub upload_id: Uuid,
    pub robots_id: Uuid,
    pub origin_id: Option<Uuid>,
    pub url: String,
    pub last_modified: Option<i64>,
    pub change_freq: Option<String>,
    pub scraped: bool,
}

/// Result of one batched save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub rows: usize,
    pub chunks: usize,
}

/// An index record, as needed to walk into the sitemap it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexChild {
    pub id: Uuid,
    pub url: String,
}

/// Row counts for one upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSummary {
    pub robots: usize,
    pub sitemap_index: usize,
    pub sitemap_urlset: usize,
}
