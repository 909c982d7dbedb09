//! Flow kinds and the states a flow instance moves through.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which flow a journal row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowKind {
    Robots,
    Sitemap,
}

impl FlowKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowKind::Robots => "robots",
            FlowKind::Sitemap => "sitemap",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "robots" => Ok(FlowKind::Robots),
            "sitemap" => Ok(FlowKind::Sitemap),
            other => Err(format!("unknown flow kind {other:?}")),
        }
    }
}

/// Lifecycle state of a flow instance.
///
/// Robots flows go `Start → Fetching → Saving → Done`; sitemap flows go
/// `Start → Fetching → Staging → Persisting → Done`. Any non-terminal state
/// may move to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowState {
    Start,
    Fetching,
    Staging,
    Saving,
    Persisting,
    Done,
    Failed,
}

impl FlowState {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowState::Start => "start",
            FlowState::Fetching => "fetching",
            FlowState::Staging => "staging",
            FlowState::Saving => "saving",
            FlowState::Persisting => "persisting",
            FlowState::Done => "done",
            FlowState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FlowState::Done | FlowState::Failed)
    }

    /// Whether a flow of `kind` may move from `self` to `next`.
    pub fn can_transition(self, kind: FlowKind, next: FlowState) -> bool {
        use FlowState::*;
        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        match kind {
            FlowKind::Robots => matches!(
                (self, next),
                (Start, Fetching) | (Fetching, Saving) | (Saving, Done)
            ),
            FlowKind::Sitemap => matches!(
                (self, next),
                (Start, Fetching)
                    | (Fetching, Staging)
                    | (Staging, Persisting)
                    | (Staging, Done)
                    | (Persisting, Done)
            ),
        }
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "start" => FlowState::Start,
            "fetching" => FlowState::Fetching,
            "staging" => FlowState::Staging,
            "saving" => FlowState::Saving,
            "persisting" => FlowState::Persisting,
            "done" => FlowState::Done,
            "failed" => FlowState::Failed,
            other => return Err(format!("unknown flow state {other:?}")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_robots_transitions() {
        use FlowState::*;
        assert!(Start.can_transition(FlowKind::Robots, Fetching));
        assert!(Fetching.can_transition(FlowKind::Robots, Saving));
        assert!(Saving.can_transition(FlowKind::Robots, Done));
        assert!(Fetching.can_transition(FlowKind::Robots, Failed));
        assert!(!Fetching.can_transition(FlowKind::Robots, Staging));
        assert!(!Done.can_transition(FlowKind::Robots, Failed));
    }

    #[test]
    fn test_sitemap_empty_document_skips_persisting() {
        use FlowState::*;
        assert!(Staging.can_transition(FlowKind::Sitemap, Done));
        assert!(Staging.can_transition(FlowKind::Sitemap, Persisting));
        assert!(!Start.can_transition(FlowKind::Sitemap, Saving));
    }

    #[test]
    fn test_string_forms_roundtrip() {
        for state in [
            FlowState::Start,
            FlowState::Fetching,
            FlowState::Staging,
            FlowState::Saving,
            FlowState::Persisting,
            FlowState::Done,
            FlowState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<FlowState>().unwrap(), state);
        }
        assert_eq!("sitemap".parse::<FlowKind>().unwrap(), FlowKind::Sitemap);
        assert!("bogus".parse::<FlowKind>().is_err());
    }
}
