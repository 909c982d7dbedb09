//! Durable orchestration of the robots and sitemap flows.
//!
//! Flows are plain async functions over a [`context::FlowContext`]; every
//! side effect goes through a journaled [`activities::Step`]. The
//! [`worker::Worker`] runs many flows at once and resumes unfinished ones,
//! and the [`walker::SitemapWalker`] chains flows across a whole sitemap tree.

pub mod activities;
pub mod context;
pub mod retry;
pub mod robots_flow;
pub mod sitemap_flow;
pub mod state;
pub mod walker;
pub mod worker;

use crate::error::IngestError;
use uuid::Uuid;

pub use activities::{Activities, IngestActivities, Step};
pub use retry::RetryPolicy;
pub use robots_flow::{RobotsOutcome, RobotsRequest};
pub use sitemap_flow::{SitemapOutcome, SitemapRequest};
pub use state::{FlowKind, FlowState};
pub use walker::{CrawlReport, SitemapWalker};
pub use worker::{FlowOutcome, FlowPolicies, FlowRequest, FlowRun, Worker};

/// Parse a required ID field.
pub(crate) fn parse_id(field: &'static str, value: &str) -> Result<Uuid, IngestError> {
    Uuid::parse_str(value.trim()).map_err(|_| IngestError::InvalidId {
        field,
        value: value.to_string(),
    })
}

/// Use the caller's upload ID, or mint one when it is absent or empty.
pub(crate) fn resolve_upload_id(value: Option<&str>) -> Result<Uuid, IngestError> {
    match value.map(str::trim) {
        None | Some("") => Ok(Uuid::new_v4()),
        Some(id) => parse_id("upload_id", id),
    }
}
