//! The side-effecting steps flows are built from.
//!
//! Each [`Step`] maps to one method of [`Activities`]. Flows never touch the
//! network or the stores directly; they call activities through the step
//! engine, which journals inputs and outputs and applies retry policy.

use crate::acquisition::{Accept, Fetcher};
use crate::cartography::robots::robots_url;
use crate::cartography::sitemap::{self, ParsedSitemap, SitemapKind};
use crate::error::{FailureStage, IngestError};
use crate::model::{BatchSummary, RobotsRecord, SitemapIndexRecord, SitemapUrlsetRecord};
use crate::staging::{self, StagingStore};
use crate::storage::RecordStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

/// Every step a flow can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    GetRobots,
    SaveRobots,
    GetSitemap,
    SaveSitemapIndex,
    SaveSitemapUrlset,
}

impl Step {
    /// Name written to the journal.
    pub fn name(self) -> &'static str {
        match self {
            Step::GetRobots => "get_robots",
            Step::SaveRobots => "save_robots",
            Step::GetSitemap => "get_sitemap",
            Step::SaveSitemapIndex => "save_sitemap_index",
            Step::SaveSitemapUrlset => "save_sitemap_urlset",
        }
    }

    /// Stage reported when this step fails the flow.
    pub fn failure_stage(self) -> FailureStage {
        match self {
            Step::GetRobots => FailureStage::GetRobots,
            Step::SaveRobots => FailureStage::SaveRobots,
            Step::GetSitemap => FailureStage::GetSitemap,
            Step::SaveSitemapIndex => FailureStage::SaveSitemapIndex,
            Step::SaveSitemapUrlset => FailureStage::SaveSitemapUrlset,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveRobotsArgs {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub upload_id: Uuid,
    pub data: String,
}

/// Result of fetching, parsing and staging one sitemap document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetSitemapOutput {
    pub kind: SitemapKind,
    /// Absent for empty documents, which stage nothing.
    pub staging_key: Option<String>,
    pub entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveSitemapArgs {
    pub staging_key: String,
    pub entity_id: Uuid,
    pub upload_id: Uuid,
    pub robots_id: Uuid,
    pub origin_id: Option<Uuid>,
}

/// A parsed index entry with its record ID already assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedIndexEntry {
    pub id: Uuid,
    pub location: String,
    pub last_modified: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedUrlsetEntry {
    pub id: Uuid,
    pub location: String,
    pub last_modified: Option<i64>,
    pub change_frequency: Option<String>,
}

/// The value written to the staging store by [`Step::GetSitemap`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "entries", rename_all = "lowercase")]
pub enum StagedEntries {
    Index(Vec<StagedIndexEntry>),
    Urlset(Vec<StagedUrlsetEntry>),
}

impl StagedEntries {
    /// Assign record IDs to parsed entries. `None` for empty documents.
    pub fn from_parsed(parsed: ParsedSitemap) -> Option<Self> {
        match parsed {
            ParsedSitemap::Index(entries) => Some(StagedEntries::Index(
                entries
                    .into_iter()
                    .map(|e| StagedIndexEntry {
                        id: Uuid::new_v4(),
                        location: e.location,
                        last_modified: e.last_modified,
                    })
                    .collect(),
            )),
            ParsedSitemap::Urlset(entries) => Some(StagedEntries::Urlset(
                entries
                    .into_iter()
                    .map(|e| StagedUrlsetEntry {
                        id: Uuid::new_v4(),
                        location: e.location,
                        last_modified: e.last_modified,
                        change_frequency: e.change_frequency,
                    })
                    .collect(),
            )),
            ParsedSitemap::Empty => None,
        }
    }

    pub fn kind(&self) -> SitemapKind {
        match self {
            StagedEntries::Index(_) => SitemapKind::Index,
            StagedEntries::Urlset(_) => SitemapKind::Urlset,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StagedEntries::Index(entries) => entries.len(),
            StagedEntries::Urlset(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One async method per [`Step`].
#[async_trait]
pub trait Activities: Send + Sync {
    /// Fetch `{base_url}/robots.txt`.
    async fn get_robots(&self, base_url: &str) -> Result<String, IngestError>;

    async fn save_robots(&self, args: SaveRobotsArgs) -> Result<(), IngestError>;

    /// Fetch, parse and stage a sitemap document.
    async fn get_sitemap(&self, url: &str) -> Result<GetSitemapOutput, IngestError>;

    async fn save_sitemap_index(&self, args: SaveSitemapArgs) -> Result<BatchSummary, IngestError>;

    async fn save_sitemap_urlset(&self, args: SaveSitemapArgs)
        -> Result<BatchSummary, IngestError>;
}

/// [`Activities`] wired to a fetcher, a staging store and a record store.
#[derive(Clone)]
pub struct IngestActivities {
    fetcher: Arc<dyn Fetcher>,
    staging: Arc<dyn StagingStore>,
    store: Arc<dyn RecordStore>,
    staging_ttl: Duration,
}

impl IngestActivities {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        staging: Arc<dyn StagingStore>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            fetcher,
            staging,
            store,
            staging_ttl: staging::DEFAULT_TTL,
        }
    }

    pub fn with_staging_ttl(mut self, ttl: Duration) -> Self {
        self.staging_ttl = ttl;
        self
    }

    async fn read_staged(&self, key: &str) -> Result<StagedEntries, IngestError> {
        let bytes = self.staging.get(key).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| IngestError::StagedPayload(format!("{key}: {e}")))
    }
}

#[async_trait]
impl Activities for IngestActivities {
    async fn get_robots(&self, base_url: &str) -> Result<String, IngestError> {
        let url = robots_url(base_url)?;
        let body = self.fetcher.fetch(&url, Accept::PlainText).await?;
        String::from_utf8(body).map_err(|e| IngestError::InvalidEncoding {
            url,
            message: e.utf8_error().to_string(),
        })
    }

    async fn save_robots(&self, args: SaveRobotsArgs) -> Result<(), IngestError> {
        let record = RobotsRecord::new(args.id, args.entity_id, args.upload_id, args.data);
        self.store.save_robots(record).await
    }

    async fn get_sitemap(&self, url: &str) -> Result<GetSitemapOutput, IngestError> {
        let body = self.fetcher.fetch(url, Accept::Xml).await?;

        let parsed = sitemap::parse_sitemap(&body).map_err(|e| {
            error!(
                url,
                strategy = %e.strategy,
                position = e.position,
                excerpt = %e.excerpt,
                "sitemap parse failed: {}",
                e.message
            );
            IngestError::from(e)
        })?;

        let Some(staged) = StagedEntries::from_parsed(parsed) else {
            info!(url, "sitemap document is empty");
            return Ok(GetSitemapOutput {
                kind: SitemapKind::Empty,
                staging_key: None,
                entries: 0,
            });
        };

        let key = staging::new_key();
        let payload = serde_json::to_vec(&staged)?;
        self.staging.put(&key, payload, self.staging_ttl).await?;
        info!(url, kind = %staged.kind(), entries = staged.len(), key = %key, "staged sitemap entries");

        Ok(GetSitemapOutput {
            kind: staged.kind(),
            staging_key: Some(key),
            entries: staged.len(),
        })
    }

    async fn save_sitemap_index(&self, args: SaveSitemapArgs) -> Result<BatchSummary, IngestError> {
        let entries = match self.read_staged(&args.staging_key).await? {
            StagedEntries::Index(entries) => entries,
            other => {
                return Err(IngestError::StagedPayload(format!(
                    "{}: expected index entries, found {}",
                    args.staging_key,
                    other.kind()
                )))
            }
        };

        let records = entries
            .into_iter()
            .map(|e| SitemapIndexRecord {
                id: e.id,
                entity_id: args.entity_id,
                upload_id: args.upload_id,
                robots_id: args.robots_id,
                origin_id: args.origin_id,
                url: e.location,
                last_modified: e.last_modified,
                scraped: false,
            })
            .collect();
        self.store.save_sitemap_index(records).await
    }

    async fn save_sitemap_urlset(
        &self,
        args: SaveSitemapArgs,
    ) -> Result<BatchSummary, IngestError> {
        let entries = match self.read_staged(&args.staging_key).await? {
            StagedEntries::Urlset(entries) => entries,
            other => {
                return Err(IngestError::StagedPayload(format!(
                    "{}: expected urlset entries, found {}",
                    args.staging_key,
                    other.kind()
                )))
            }
        };

        let records = entries
            .into_iter()
            .map(|e| SitemapUrlsetRecord {
                id: e.id,
                entity_id: args.entity_id,
                upload_id: args.upload_id,
                robots_id: args.robots_id,
                origin_id: args.origin_id,
                url: e.location,
                last_modified: e.last_modified,
                change_freq: e.change_frequency,
                scraped: false,
            })
            .collect();
        self.store.save_sitemap_urlset(records).await
    }
}
