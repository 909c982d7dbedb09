//! Error taxonomy for the ingestion pipeline.
//!
//! Every step failure is an [`IngestError`]. The step engine asks
//! [`IngestError::is_retryable`] whether another attempt can help; flows wrap
//! the terminal error in a [`FlowError`] naming the stage that failed.

use crate::cartography::sitemap::ParseError;
use std::fmt;
use thiserror::Error;

/// Errors raised by fetch, parse, staging, persistence and journal operations.
#[derive(Debug, Error)]
pub enum IngestError {
    /// DNS, connect, timeout or body-read failure.
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// The server answered with a non-2xx status.
    #[error("request to {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// A step attempt ran past its timeout.
    #[error("{step} timed out after {timeout_secs}s")]
    Timeout { step: &'static str, timeout_secs: u64 },

    /// Malformed sitemap content under the strategy that won classification.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The staged payload expired or was never written.
    #[error("staged payload {key} not found or expired")]
    StagingMiss { key: String },

    /// The staged payload exists but does not hold what the step expected.
    #[error("unexpected staged payload: {0}")]
    StagedPayload(String),

    /// Relational store failure (the transaction has been rolled back).
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A write failed and undoing it failed too.
    #[error("rollback failed ({rollback}) after write error: {original}")]
    Rollback {
        original: Box<IngestError>,
        rollback: rusqlite::Error,
    },

    /// An ID field did not parse as a UUID.
    #[error("invalid {field}: {value:?} is not a UUID")]
    InvalidId { field: &'static str, value: String },

    /// A fetched text document is not valid UTF-8.
    #[error("{url} is not valid UTF-8: {message}")]
    InvalidEncoding { url: String, message: String },

    /// Any other malformed caller input (URLs, empty required fields).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The step's retry budget ran out; `last` is the final attempt's error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<IngestError> },

    #[error("flow cancelled")]
    Cancelled,

    /// Blocking task panicked or a lock was poisoned.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// Whether the step engine should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::Transport { .. }
                | IngestError::HttpStatus { .. }
                | IngestError::Timeout { .. }
                | IngestError::Storage(_)
                | IngestError::Rollback { .. }
                | IngestError::Internal(_)
        )
    }

    /// Peel off an [`IngestError::Exhausted`] wrapper.
    pub fn root(&self) -> &IngestError {
        match self {
            IngestError::Exhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

/// The stage of a flow that produced its terminal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Input,
    GetRobots,
    SaveRobots,
    GetSitemap,
    SaveSitemapIndex,
    SaveSitemapUrlset,
    Journal,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureStage::Input => "invalid flow input",
            FailureStage::GetRobots => "failed to get robots.txt",
            FailureStage::SaveRobots => "failed to save robots.txt",
            FailureStage::GetSitemap => "failed to get sitemaps",
            FailureStage::SaveSitemapIndex => "failed to save sitemap index to table",
            FailureStage::SaveSitemapUrlset => "failed to save sitemap urlset to table",
            FailureStage::Journal => "flow journal unavailable",
        };
        f.write_str(label)
    }
}

/// Terminal error of a robots or sitemap flow.
#[derive(Debug, Error)]
#[error("{stage}: {source}")]
pub struct FlowError {
    pub stage: FailureStage,
    pub source: IngestError,
}

impl FlowError {
    pub fn new(stage: FailureStage, source: IngestError) -> Self {
        Self { stage, source }
    }

    /// True when the flow died because its staged payload was gone. Callers
    /// recover by running the whole flow again, never by re-reading the key.
    pub fn is_staging_miss(&self) -> bool {
        matches!(self.source.root(), IngestError::StagingMiss { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.source.root(), IngestError::Cancelled)
    }
}
