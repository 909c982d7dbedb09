//! Sitemap tree walker.
//!
//! Starts from robots.txt, runs a sitemap flow for every `Sitemap:`
//! directive, then descends level by level into the child sitemaps that the
//! index documents of the previous level listed. Each child flow carries the
//! ID of the index record that pointed at it as its origin.

use crate::cartography::sitemap::SitemapKind;
use crate::error::{FlowError, IngestError};
use crate::orchestration::robots_flow::RobotsRequest;
use crate::orchestration::sitemap_flow::SitemapRequest;
use crate::orchestration::worker::{FlowOutcome, FlowRequest, FlowRun, Worker};
use crate::storage::RecordStore;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Sitemap levels walked below robots.txt.
pub const DEFAULT_MAX_DEPTH: usize = 4;

/// Totals for one crawl.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    pub upload_id: Uuid,
    pub robots_id: Uuid,
    pub levels: usize,
    pub sitemap_flows: usize,
    pub failed_flows: usize,
    /// Flows re-run after their staged payload expired.
    pub reruns: usize,
    pub index_records: usize,
    pub urlset_records: usize,
    pub empty_documents: usize,
    /// Sitemaps skipped because `max_depth` was reached.
    pub truncated: usize,
    pub errors: Vec<String>,
}

/// One sitemap queued for the current level.
#[derive(Debug, Clone)]
struct Pending {
    url: String,
    origin_id: Option<Uuid>,
}

pub struct SitemapWalker {
    worker: Worker,
    store: Arc<dyn RecordStore>,
    max_depth: usize,
}

impl SitemapWalker {
    pub fn new(worker: Worker, store: Arc<dyn RecordStore>) -> Self {
        Self {
            worker,
            store,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Ingest robots.txt and the full sitemap tree of one site.
    ///
    /// A robots failure aborts the crawl. Sitemap failures are counted and
    /// the walk continues with whatever the other flows produced.
    pub async fn crawl(
        &self,
        entity_id: &str,
        base_url: &str,
        upload_id: Option<&str>,
    ) -> Result<CrawlReport, FlowError> {
        let (_, robots) = self
            .worker
            .run_robots(RobotsRequest {
                upload_id: upload_id.map(str::to_string),
                entity_id: entity_id.to_string(),
                url: base_url.to_string(),
            })
            .await;
        let robots = robots?;

        let mut report = CrawlReport {
            upload_id: robots.upload_id,
            robots_id: robots.robots_id,
            ..CrawlReport::default()
        };
        info!(
            upload_id = %report.upload_id,
            robots_id = %report.robots_id,
            sitemaps = robots.sitemaps.len(),
            "starting sitemap walk"
        );

        let mut visited: HashSet<String> = HashSet::new();
        let mut level: Vec<Pending> = robots
            .sitemaps
            .into_iter()
            .filter(|url| visited.insert(url.clone()))
            .map(|url| Pending {
                url,
                origin_id: None,
            })
            .collect();

        while !level.is_empty() {
            if report.levels >= self.max_depth {
                warn!(skipped = level.len(), max_depth = self.max_depth, "sitemap depth limit reached");
                report.truncated += level.len();
                break;
            }
            report.levels += 1;

            let origins: Vec<Option<Uuid>> = {
                let mut seen = HashSet::new();
                level
                    .iter()
                    .map(|p| p.origin_id)
                    .filter(|origin| seen.insert(*origin))
                    .collect()
            };

            self.run_level(entity_id, &level, &mut report).await;

            let mut next = Vec::new();
            for origin in origins {
                let children = match self
                    .store
                    .sitemap_index_children(report.upload_id, report.robots_id, origin)
                    .await
                {
                    Ok(children) => children,
                    Err(err) => {
                        record_error(&mut report, &err);
                        continue;
                    }
                };
                next.extend(
                    children
                        .into_iter()
                        .filter(|child| visited.insert(child.url.clone()))
                        .map(|child| Pending {
                            url: child.url,
                            origin_id: Some(child.id),
                        }),
                );
            }
            level = next;
        }

        info!(
            upload_id = %report.upload_id,
            levels = report.levels,
            flows = report.sitemap_flows,
            failed = report.failed_flows,
            index_records = report.index_records,
            urlset_records = report.urlset_records,
            "sitemap walk finished"
        );
        Ok(report)
    }

    async fn run_level(&self, entity_id: &str, level: &[Pending], report: &mut CrawlReport) {
        let requests: Vec<SitemapRequest> = level
            .iter()
            .map(|p| SitemapRequest {
                upload_id: Some(report.upload_id.to_string()),
                entity_id: entity_id.to_string(),
                robots_id: report.robots_id.to_string(),
                origin_id: p.origin_id.map(|id| id.to_string()),
                url: p.url.clone(),
            })
            .collect();

        let runs = self
            .worker
            .run_all(requests.iter().cloned().map(FlowRequest::Sitemap).collect())
            .await;

        for (request, run) in requests.into_iter().zip(runs) {
            let expired = run
                .result
                .as_ref()
                .err()
                .is_some_and(FlowError::is_staging_miss);
            let run = if expired {
                warn!(url = %request.url, flow_id = %run.flow_id, "staged payload expired; re-running flow");
                report.reruns += 1;
                self.worker.run(FlowRequest::Sitemap(request)).await
            } else {
                run
            };
            tally(report, run);
        }
    }
}

fn tally(report: &mut CrawlReport, run: FlowRun) {
    report.sitemap_flows += 1;
    match run.result {
        Ok(FlowOutcome::Sitemap(outcome)) => match outcome.kind {
            SitemapKind::Index => report.index_records += outcome.rows,
            SitemapKind::Urlset => report.urlset_records += outcome.rows,
            SitemapKind::Empty => report.empty_documents += 1,
        },
        Ok(FlowOutcome::Robots(_)) => {}
        Err(err) => {
            report.failed_flows += 1;
            report.errors.push(format!("{}: {err}", run.flow_id));
        }
    }
}

fn record_error(report: &mut CrawlReport, err: &IngestError) {
    warn!(error = %err, "could not list child sitemaps");
    report.errors.push(err.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{Accept, Fetcher};
    use crate::orchestration::activities::IngestActivities;
    use crate::staging::MemoryStagingStore;
    use crate::storage::{Database, FlowJournal, SqliteRecordStore};
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Serves fixed documents by URL.
    struct SiteFetcher(HashMap<String, String>);

    #[async_trait]
    impl Fetcher for SiteFetcher {
        async fn fetch(&self, url: &str, _accept: Accept) -> Result<Vec<u8>, IngestError> {
            self.0
                .get(url)
                .map(|body| body.as_bytes().to_vec())
                .ok_or_else(|| IngestError::HttpStatus {
                    url: url.to_string(),
                    status: 404,
                })
        }
    }

    fn site() -> SiteFetcher {
        let docs = [
            (
                "https://shop.test/robots.txt",
                "User-agent: *\nSitemap: https://shop.test/sitemap.xml\n",
            ),
            (
                "https://shop.test/sitemap.xml",
                "<sitemapindex>\
                   <sitemap><loc>https://shop.test/products.xml</loc></sitemap>\
                   <sitemap><loc>https://shop.test/nested.xml</loc></sitemap>\
                 </sitemapindex>",
            ),
            (
                "https://shop.test/products.xml",
                "<urlset><url><loc>https://shop.test/p/1</loc></url>\
                 <url><loc>https://shop.test/p/2</loc></url></urlset>",
            ),
            (
                "https://shop.test/nested.xml",
                "<sitemapindex>\
                   <sitemap><loc>https://shop.test/blog.xml</loc></sitemap>\
                   <sitemap><loc>https://shop.test/sitemap.xml</loc></sitemap>\
                 </sitemapindex>",
            ),
            (
                "https://shop.test/blog.xml",
                "<urlset><url><loc>https://shop.test/blog/hello</loc></url></urlset>",
            ),
        ];
        SiteFetcher(
            docs.into_iter()
                .map(|(url, body)| (url.to_string(), body.to_string()))
                .collect(),
        )
    }

    fn walker(max_depth: usize) -> (SitemapWalker, SqliteRecordStore) {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteRecordStore::new(db.clone());
        let activities = IngestActivities::new(
            Arc::new(site()),
            Arc::new(MemoryStagingStore::new()),
            Arc::new(store.clone()),
        );
        let worker = Worker::new(Arc::new(activities), FlowJournal::new(db), 4);
        let walker = SitemapWalker::new(worker, Arc::new(store.clone())).with_max_depth(max_depth);
        (walker, store)
    }

    #[tokio::test]
    async fn test_walks_nested_indexes_with_origins() {
        let (walker, store) = walker(DEFAULT_MAX_DEPTH);
        let entity = Uuid::new_v4().to_string();
        let report = walker.crawl(&entity, "https://shop.test/", None).await.unwrap();

        assert_eq!(report.levels, 3);
        assert_eq!(report.sitemap_flows, 4);
        assert_eq!(report.failed_flows, 0);
        // The root index lists 2 children, the nested index lists 2 more
        // (one of them a cycle back to the root, which is not walked again).
        assert_eq!(report.index_records, 4);
        assert_eq!(report.urlset_records, 3);

        let pages = store.sitemap_urlset_records(report.upload_id).await.unwrap();
        let blog = pages.iter().find(|p| p.url.ends_with("/blog/hello")).unwrap();
        let indexes = store.sitemap_index_records(report.upload_id).await.unwrap();
        let nested = indexes
            .iter()
            .find(|r| r.url == "https://shop.test/nested.xml")
            .unwrap();
        let blog_index = indexes
            .iter()
            .find(|r| r.url == "https://shop.test/blog.xml")
            .unwrap();
        assert_eq!(nested.origin_id, None);
        assert_eq!(blog_index.origin_id, Some(nested.id));
        assert_eq!(blog.origin_id, Some(blog_index.id));
    }

    #[tokio::test]
    async fn test_depth_limit_truncates() {
        let (walker, _) = walker(1);
        let entity = Uuid::new_v4().to_string();
        let report = walker.crawl(&entity, "https://shop.test", None).await.unwrap();
        assert_eq!(report.levels, 1);
        assert_eq!(report.sitemap_flows, 1);
        assert_eq!(report.truncated, 2);
        assert_eq!(report.urlset_records, 0);
    }

    #[tokio::test]
    async fn test_robots_failure_aborts_crawl() {
        let (walker, _) = walker(DEFAULT_MAX_DEPTH);
        let err = walker
            .crawl(&Uuid::new_v4().to_string(), "not a url", None)
            .await
            .unwrap_err();
        assert_eq!(err.stage, crate::error::FailureStage::Input);
    }
}
