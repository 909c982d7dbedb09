//! CLI subcommand implementations for the `crawl-ingest` binary.

pub mod crawl_cmd;
pub mod flows_cmd;
pub mod output;
pub mod resume_cmd;
pub mod robots_cmd;
pub mod sitemap_cmd;
pub mod staging_cmd;

use crate::acquisition::HttpFetcher;
use crate::config::IngestConfig;
use crate::orchestration::{IngestActivities, SitemapWalker, Worker};
use crate::staging::{MemoryStagingStore, SqliteStagingStore, StagingStore};
use crate::storage::{Database, FlowJournal, SqliteRecordStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything a command needs, built once from the configuration.
pub struct Services {
    pub config: IngestConfig,
    pub store: SqliteRecordStore,
    pub staging: Arc<dyn StagingStore>,
    pub journal: FlowJournal,
    pub worker: Worker,
}

impl Services {
    pub fn open(config: IngestConfig) -> Result<Self> {
        config.validate()?;

        let db = Database::open(&config.db_path)
            .with_context(|| format!("failed to open database: {}", config.db_path.display()))?;
        debug!(path = %config.db_path.display(), "database ready");

        let store = SqliteRecordStore::new(db.clone()).with_chunk_size(config.batch_size);
        let staging: Arc<dyn StagingStore> = if config.memory_staging {
            Arc::new(MemoryStagingStore::new())
        } else {
            Arc::new(SqliteStagingStore::new(db.clone()))
        };
        let fetcher = HttpFetcher::new(&config.user_agent, config.request_timeout())
            .context("failed to build HTTP client")?;

        let activities = IngestActivities::new(
            Arc::new(fetcher),
            Arc::clone(&staging),
            Arc::new(store.clone()),
        )
        .with_staging_ttl(config.staging_ttl());

        let journal = FlowJournal::new(db);
        let worker = Worker::new(
            Arc::new(activities),
            journal.clone(),
            config.max_concurrent_flows,
        );

        Ok(Self {
            config,
            store,
            staging,
            journal,
            worker,
        })
    }

    pub fn walker(&self, max_depth: usize) -> SitemapWalker {
        SitemapWalker::new(self.worker.clone(), Arc::new(self.store.clone()))
            .with_max_depth(max_depth)
    }

    /// Cancel running flows on ctrl-c. They stop at the next step boundary
    /// and can be picked up later with `crawl-ingest resume`.
    pub fn shutdown_on_ctrl_c(&self) {
        let worker = self.worker.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; stopping flows");
                worker.shutdown();
            }
        });
    }
}
