//! Robots ingestion: fetch `{base}/robots.txt` and store it as one record.

use crate::cartography::robots::{robots_url, sitemap_directives};
use crate::error::{FlowError, IngestError};
use crate::orchestration::activities::{Activities, SaveRobotsArgs, Step};
use crate::orchestration::context::FlowContext;
use crate::orchestration::retry::RetryPolicy;
use crate::orchestration::state::FlowState;
use crate::orchestration::{parse_id, resolve_upload_id};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Caller-facing request. IDs arrive as strings and are checked by
/// [`RobotsRequest::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotsRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    pub entity_id: String,
    pub url: String,
}

/// Validated input, journaled when the flow starts so a resumed run reuses
/// the same upload and record IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotsInput {
    pub upload_id: Uuid,
    pub entity_id: Uuid,
    pub robots_id: Uuid,
    pub url: String,
}

impl RobotsRequest {
    pub fn resolve(&self) -> Result<RobotsInput, IngestError> {
        let entity_id = parse_id("entity_id", &self.entity_id)?;
        let upload_id = resolve_upload_id(self.upload_id.as_deref())?;
        robots_url(&self.url)?;
        Ok(RobotsInput {
            upload_id,
            entity_id,
            robots_id: Uuid::new_v4(),
            url: self.url.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotsOutcome {
    pub upload_id: Uuid,
    pub robots_id: Uuid,
    /// `Sitemap:` directives found in the body.
    pub sitemaps: Vec<String>,
}

/// Drive one robots flow to completion.
pub async fn run_robots_flow(
    ctx: &mut FlowContext,
    activities: &dyn Activities,
    policy: &RetryPolicy,
    input: &RobotsInput,
) -> Result<RobotsOutcome, FlowError> {
    ctx.transition(FlowState::Fetching).await?;
    let body: String = ctx
        .step(Step::GetRobots, policy, || activities.get_robots(&input.url))
        .await?;

    ctx.transition(FlowState::Saving).await?;
    let args = SaveRobotsArgs {
        id: input.robots_id,
        entity_id: input.entity_id,
        upload_id: input.upload_id,
        data: body.clone(),
    };
    ctx.step(Step::SaveRobots, policy, || activities.save_robots(args.clone()))
        .await?;

    let sitemaps = sitemap_directives(&body, &input.url);
    info!(
        flow_id = %ctx.flow_id(),
        robots_id = %input.robots_id,
        bytes = body.len(),
        sitemaps = sitemaps.len(),
        "robots.txt ingested"
    );

    Ok(RobotsOutcome {
        upload_id: input.upload_id,
        robots_id: input.robots_id,
        sitemaps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(upload_id: Option<&str>) -> RobotsRequest {
        RobotsRequest {
            upload_id: upload_id.map(str::to_string),
            entity_id: "6f1c2d9e-3b7a-4a53-9a51-0c6d2b1e8f40".into(),
            url: "https://example.com/".into(),
        }
    }

    #[test]
    fn test_supplied_upload_id_is_kept() {
        let id = "0b3f5d2a-91c4-4e6b-8a7d-2c1e9f4b6a35";
        let input = request(Some(id)).resolve().unwrap();
        assert_eq!(input.upload_id.to_string(), id);
    }

    #[test]
    fn test_absent_or_empty_upload_id_is_generated() {
        let a = request(None).resolve().unwrap();
        let b = request(Some("")).resolve().unwrap();
        assert_eq!(a.upload_id.get_version_num(), 4);
        assert_eq!(b.upload_id.get_version_num(), 4);
        assert_ne!(a.upload_id, b.upload_id);
    }

    #[test]
    fn test_malformed_ids_are_rejected() {
        let err = request(Some("not-a-uuid")).resolve().unwrap_err();
        assert!(matches!(err, IngestError::InvalidId { field: "upload_id", .. }));

        let mut bad_entity = request(None);
        bad_entity.entity_id = "site-42".into();
        assert!(matches!(
            bad_entity.resolve().unwrap_err(),
            IngestError::InvalidId { field: "entity_id", .. }
        ));
    }

    #[test]
    fn test_non_http_url_is_rejected() {
        let mut req = request(None);
        req.url = "ftp://example.com".into();
        assert!(matches!(req.resolve().unwrap_err(), IngestError::InvalidInput(_)));
    }
}
