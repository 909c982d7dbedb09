//! Sitemap ingestion: fetch one sitemap document, stage its entries, then
//! persist them into the table matching the document kind.

use crate::cartography::sitemap::SitemapKind;
use crate::error::{FlowError, IngestError};
use crate::orchestration::activities::{Activities, GetSitemapOutput, SaveSitemapArgs, Step};
use crate::orchestration::context::FlowContext;
use crate::orchestration::retry::RetryPolicy;
use crate::orchestration::state::FlowState;
use crate::orchestration::{parse_id, resolve_upload_id};
use crate::model::BatchSummary;
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitemapRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    pub entity_id: String,
    pub robots_id: String,
    /// ID of the index record that listed this sitemap; absent for sitemaps
    /// found in robots.txt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitemapInput {
    pub upload_id: Uuid,
    pub entity_id: Uuid,
    pub robots_id: Uuid,
    pub origin_id: Option<Uuid>,
    pub url: String,
}

impl SitemapRequest {
    pub fn resolve(&self) -> Result<SitemapInput, IngestError> {
        let entity_id = parse_id("entity_id", &self.entity_id)?;
        let robots_id = parse_id("robots_id", &self.robots_id)?;
        let origin_id = self
            .origin_id
            .as_deref()
            .map(|id| parse_id("origin_id", id))
            .transpose()?;
        let upload_id = resolve_upload_id(self.upload_id.as_deref())?;

        let url = self.url.trim();
        let parsed = Url::parse(url)
            .map_err(|e| IngestError::InvalidInput(format!("sitemap url {url:?}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(IngestError::InvalidInput(format!(
                "sitemap url {url:?} must use http or https"
            )));
        }

        Ok(SitemapInput {
            upload_id,
            entity_id,
            robots_id,
            origin_id,
            url: url.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitemapOutcome {
    pub upload_id: Uuid,
    pub kind: SitemapKind,
    /// Records written (0 for empty documents).
    pub rows: usize,
}

/// Drive one sitemap flow to completion.
pub async fn run_sitemap_flow(
    ctx: &mut FlowContext,
    activities: &dyn Activities,
    policy: &RetryPolicy,
    input: &SitemapInput,
) -> Result<SitemapOutcome, FlowError> {
    ctx.transition(FlowState::Fetching).await?;
    let fetched: GetSitemapOutput = ctx
        .step(Step::GetSitemap, policy, || activities.get_sitemap(&input.url))
        .await?;
    ctx.transition(FlowState::Staging).await?;

    let staging_key = match (fetched.kind, fetched.staging_key) {
        (SitemapKind::Empty, _) | (_, None) => {
            info!(flow_id = %ctx.flow_id(), url = %input.url, "empty sitemap; nothing to persist");
            return Ok(SitemapOutcome {
                upload_id: input.upload_id,
                kind: SitemapKind::Empty,
                rows: 0,
            });
        }
        (_, Some(key)) => key,
    };

    ctx.transition(FlowState::Persisting).await?;
    let args = SaveSitemapArgs {
        staging_key,
        entity_id: input.entity_id,
        upload_id: input.upload_id,
        robots_id: input.robots_id,
        origin_id: input.origin_id,
    };

    let summary: BatchSummary = match fetched.kind {
        SitemapKind::Index => {
            ctx.step(Step::SaveSitemapIndex, policy, || {
                activities.save_sitemap_index(args.clone())
            })
            .await?
        }
        _ => {
            ctx.step(Step::SaveSitemapUrlset, policy, || {
                activities.save_sitemap_urlset(args.clone())
            })
            .await?
        }
    };

    info!(
        flow_id = %ctx.flow_id(),
        url = %input.url,
        kind = %fetched.kind,
        rows = summary.rows,
        chunks = summary.chunks,
        "sitemap ingested"
    );

    Ok(SitemapOutcome {
        upload_id: input.upload_id,
        kind: fetched.kind,
        rows: summary.rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SitemapRequest {
        SitemapRequest {
            upload_id: None,
            entity_id: Uuid::new_v4().to_string(),
            robots_id: Uuid::new_v4().to_string(),
            origin_id: None,
            url: "https://example.com/sitemap.xml".into(),
        }
    }

    #[test]
    fn test_resolve_without_origin() {
        let input = request().resolve().unwrap();
        assert_eq!(input.origin_id, None);
        assert_eq!(input.url, "https://example.com/sitemap.xml");
    }

    #[test]
    fn test_origin_is_parsed() {
        let origin = Uuid::new_v4();
        let mut req = request();
        req.origin_id = Some(origin.to_string());
        assert_eq!(req.resolve().unwrap().origin_id, Some(origin));
    }

    #[test]
    fn test_empty_origin_is_rejected() {
        let mut req = request();
        req.origin_id = Some(String::new());
        assert!(matches!(
            req.resolve().unwrap_err(),
            IngestError::InvalidId { field: "origin_id", .. }
        ));
    }

    #[test]
    fn test_missing_robots_id_is_rejected() {
        let mut req = request();
        req.robots_id = String::new();
        assert!(matches!(
            req.resolve().unwrap_err(),
            IngestError::InvalidId { field: "robots_id", .. }
        ));
    }

    #[test]
    fn test_request_json_omits_absent_options() {
        let json = serde_json::to_value(request()).unwrap();
        assert!(json.get("origin_id").is_none());
        assert!(json.get("upload_id").is_none());
        let back: SitemapRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back.origin_id, None);
    }
}
