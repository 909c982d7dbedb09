//! Runs flow instances concurrently against shared activities and journal.

use crate::error::{FailureStage, FlowError, IngestError};
use crate::orchestration::activities::Activities;
use crate::orchestration::context::FlowContext;
use crate::orchestration::retry::RetryPolicy;
use crate::orchestration::robots_flow::{run_robots_flow, RobotsInput, RobotsOutcome, RobotsRequest};
use crate::orchestration::sitemap_flow::{
    run_sitemap_flow, SitemapInput, SitemapOutcome, SitemapRequest,
};
use crate::orchestration::state::FlowKind;
use crate::storage::{FlowJournal, FlowRow};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Flows allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT_FLOWS: usize = 8;

/// A request to start a new flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FlowRequest {
    Robots(RobotsRequest),
    Sitemap(SitemapRequest),
}

impl FlowRequest {
    pub fn kind(&self) -> FlowKind {
        match self {
            FlowRequest::Robots(_) => FlowKind::Robots,
            FlowRequest::Sitemap(_) => FlowKind::Sitemap,
        }
    }

    fn resolve(&self) -> Result<FlowInput, IngestError> {
        match self {
            FlowRequest::Robots(req) => req.resolve().map(FlowInput::Robots),
            FlowRequest::Sitemap(req) => req.resolve().map(FlowInput::Sitemap),
        }
    }
}

/// Validated flow input as stored in the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FlowInput {
    Robots(RobotsInput),
    Sitemap(SitemapInput),
}

impl FlowInput {
    fn kind(&self) -> FlowKind {
        match self {
            FlowInput::Robots(_) => FlowKind::Robots,
            FlowInput::Sitemap(_) => FlowKind::Sitemap,
        }
    }

    fn to_json(&self) -> Result<Value, IngestError> {
        Ok(match self {
            FlowInput::Robots(input) => serde_json::to_value(input)?,
            FlowInput::Sitemap(input) => serde_json::to_value(input)?,
        })
    }

    fn from_row(row: &FlowRow) -> Result<Self, IngestError> {
        let input = row.input.clone();
        Ok(match row.kind {
            FlowKind::Robots => FlowInput::Robots(serde_json::from_value(input)?),
            FlowKind::Sitemap => FlowInput::Sitemap(serde_json::from_value(input)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FlowOutcome {
    Robots(RobotsOutcome),
    Sitemap(SitemapOutcome),
}

/// The result of running one flow instance.
#[derive(Debug)]
pub struct FlowRun {
    pub flow_id: Uuid,
    pub kind: FlowKind,
    pub result: Result<FlowOutcome, FlowError>,
}

impl FlowRun {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Retry policy per flow kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowPolicies {
    pub robots: RetryPolicy,
    pub sitemap: RetryPolicy,
}

impl Default for FlowPolicies {
    fn default() -> Self {
        Self {
            robots: RetryPolicy::robots(),
            sitemap: RetryPolicy::sitemap(),
        }
    }
}

/// Executes flows with bounded concurrency.
#[derive(Clone)]
pub struct Worker {
    activities: Arc<dyn Activities>,
    journal: FlowJournal,
    policies: FlowPolicies,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(activities: Arc<dyn Activities>, journal: FlowJournal, max_concurrent: usize) -> Self {
        Self {
            activities,
            journal,
            policies: FlowPolicies::default(),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policies(mut self, policies: FlowPolicies) -> Self {
        self.policies = policies;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token shared by every flow this worker runs.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop starting new attempts; in-flight flows stop at their next step
    /// boundary and stay resumable.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Start a new flow and wait for it.
    pub async fn run(&self, request: FlowRequest) -> FlowRun {
        let flow_id = Uuid::new_v4();
        let kind = request.kind();

        let input = match request.resolve() {
            Ok(input) => input,
            Err(err) => {
                let err = FlowError::new(FailureStage::Input, err);
                warn!(%flow_id, %kind, error = %err, "rejected flow input");
                self.record_rejected(flow_id, &request, &err).await;
                return FlowRun {
                    flow_id,
                    kind,
                    result: Err(err),
                };
            }
        };

        let registered = match input.to_json() {
            Ok(json) => self.journal.create_flow(flow_id, kind, &json).await,
            Err(err) => Err(err),
        };
        if let Err(err) = registered {
            return FlowRun {
                flow_id,
                kind,
                result: Err(FlowError::new(FailureStage::Journal, err)),
            };
        }

        self.execute(flow_id, input).await
    }

    /// Typed shorthand for [`Worker::run`] with a robots request.
    pub async fn run_robots(&self, request: RobotsRequest) -> (Uuid, Result<RobotsOutcome, FlowError>) {
        let run = self.run(FlowRequest::Robots(request)).await;
        let result = run.result.and_then(|outcome| match outcome {
            FlowOutcome::Robots(outcome) => Ok(outcome),
            FlowOutcome::Sitemap(_) => Err(mismatched_outcome()),
        });
        (run.flow_id, result)
    }

    /// Typed shorthand for [`Worker::run`] with a sitemap request.
    pub async fn run_sitemap(
        &self,
        request: SitemapRequest,
    ) -> (Uuid, Result<SitemapOutcome, FlowError>) {
        let run = self.run(FlowRequest::Sitemap(request)).await;
        let result = run.result.and_then(|outcome| match outcome {
            FlowOutcome::Sitemap(outcome) => Ok(outcome),
            FlowOutcome::Robots(_) => Err(mismatched_outcome()),
        });
        (run.flow_id, result)
    }

    /// Run a flow on its own task.
    pub fn spawn(&self, request: FlowRequest) -> JoinHandle<FlowRun> {
        let worker = self.clone();
        tokio::spawn(async move { worker.run(request).await })
    }

    /// Run a batch concurrently; results keep the order of `requests`.
    pub async fn run_all(&self, requests: Vec<FlowRequest>) -> Vec<FlowRun> {
        join_all(requests.into_iter().map(|request| self.run(request))).await
    }

    /// Re-run every journaled flow that never reached `Done` or `Failed`,
    /// under its original ID and input.
    pub async fn resume_pending(&self) -> Result<Vec<FlowRun>, IngestError> {
        let pending = self.journal.pending_flows().await?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        info!(count = pending.len(), "resuming unfinished flows");

        let runs = pending.iter().map(|row| async move {
            match FlowInput::from_row(row) {
                Ok(input) => self.execute(row.flow_id, input).await,
                Err(err) => {
                    let err = FlowError::new(FailureStage::Input, err);
                    if let Err(journal) = self.journal.fail(row.flow_id, &err.to_string()).await {
                        error!(flow_id = %row.flow_id, error = %journal, "could not record flow failure");
                    }
                    FlowRun {
                        flow_id: row.flow_id,
                        kind: row.kind,
                        result: Err(err),
                    }
                }
            }
        });
        Ok(join_all(runs).await)
    }

    async fn execute(&self, flow_id: Uuid, input: FlowInput) -> FlowRun {
        let kind = input.kind();
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return FlowRun {
                    flow_id,
                    kind,
                    result: Err(FlowError::new(
                        FailureStage::Journal,
                        IngestError::Internal("worker semaphore closed".into()),
                    )),
                }
            }
        };

        let mut ctx = FlowContext::new(flow_id, kind, self.journal.clone(), self.cancel.clone());
        let activities = self.activities.as_ref();
        let mut result = match &input {
            FlowInput::Robots(input) => {
                run_robots_flow(&mut ctx, activities, &self.policies.robots, input)
                    .await
                    .map(FlowOutcome::Robots)
            }
            FlowInput::Sitemap(input) => {
                run_sitemap_flow(&mut ctx, activities, &self.policies.sitemap, input)
                    .await
                    .map(FlowOutcome::Sitemap)
            }
        };

        if let Err(err) = ctx.finish(&result).await {
            result = Err(err);
        }

        FlowRun {
            flow_id,
            kind,
            result,
        }
    }

    async fn record_rejected(&self, flow_id: Uuid, request: &FlowRequest, err: &FlowError) {
        let recorded = async {
            let raw = serde_json::to_value(request)?;
            self.journal.create_flow(flow_id, request.kind(), &raw).await?;
            self.journal.fail(flow_id, &err.to_string()).await
        };
        if let Err(journal) = recorded.await {
            error!(%flow_id, error = %journal, "could not record rejected flow");
        }
    }
}

fn mismatched_outcome() -> FlowError {
    FlowError::new(
        FailureStage::Journal,
        IngestError::Internal("flow produced an outcome of the wrong kind".into()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartography::sitemap::SitemapKind;
    use crate::model::BatchSummary;
    use crate::orchestration::activities::{GetSitemapOutput, SaveRobotsArgs, SaveSitemapArgs};
    use crate::orchestration::state::FlowState;
    use crate::storage::Database;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Activities that succeed instantly and count concurrent calls.
    #[derive(Default)]
    struct CountingActivities {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        robots_fetches: AtomicUsize,
    }

    impl CountingActivities {
        async fn busy(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Activities for CountingActivities {
        async fn get_robots(&self, _base_url: &str) -> Result<String, IngestError> {
            self.robots_fetches.fetch_add(1, Ordering::SeqCst);
            self.busy().await;
            Ok("Sitemap: https://a.test/sitemap.xml\n".into())
        }

        async fn save_robots(&self, _args: SaveRobotsArgs) -> Result<(), IngestError> {
            Ok(())
        }

        async fn get_sitemap(&self, _url: &str) -> Result<GetSitemapOutput, IngestError> {
            self.busy().await;
            Ok(GetSitemapOutput {
                kind: SitemapKind::Empty,
                staging_key: None,
                entries: 0,
            })
        }

        async fn save_sitemap_index(&self, _args: SaveSitemapArgs) -> Result<BatchSummary, IngestError> {
            Ok(BatchSummary::default())
        }

        async fn save_sitemap_urlset(&self, _args: SaveSitemapArgs) -> Result<BatchSummary, IngestError> {
            Ok(BatchSummary::default())
        }
    }

    fn robots_request() -> FlowRequest {
        FlowRequest::Robots(RobotsRequest {
            upload_id: None,
            entity_id: Uuid::new_v4().to_string(),
            url: "https://a.test".into(),
        })
    }

    #[tokio::test]
    async fn test_run_all_respects_concurrency_limit() {
        let activities = Arc::new(CountingActivities::default());
        let journal = FlowJournal::new(Database::open_in_memory().unwrap());
        let worker = Worker::new(activities.clone(), journal, 2);

        let runs = worker
            .run_all((0..6).map(|_| robots_request()).collect())
            .await;

        assert_eq!(runs.len(), 6);
        assert!(runs.iter().all(FlowRun::is_ok));
        assert!(activities.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_invalid_input_is_journaled_as_failed() {
        let journal = FlowJournal::new(Database::open_in_memory().unwrap());
        let worker = Worker::new(Arc::new(CountingActivities::default()), journal.clone(), 1);

        let run = worker
            .run(FlowRequest::Robots(RobotsRequest {
                upload_id: None,
                entity_id: "nope".into(),
                url: "https://a.test".into(),
            }))
            .await;

        let err = run.result.unwrap_err();
        assert_eq!(err.stage, FailureStage::Input);
        let row = journal.flow(run.flow_id).await.unwrap().unwrap();
        assert_eq!(row.state, FlowState::Failed);
        assert!(row.error.unwrap().starts_with("invalid flow input"));
    }

    #[tokio::test]
    async fn test_resume_replays_finished_steps() {
        let activities = Arc::new(CountingActivities::default());
        let journal = FlowJournal::new(Database::open_in_memory().unwrap());
        let worker = Worker::new(activities.clone(), journal.clone(), 4);

        let (flow_id, outcome) = worker
            .run_robots(RobotsRequest {
                upload_id: None,
                entity_id: Uuid::new_v4().to_string(),
                url: "https://a.test".into(),
            })
            .await;
        let outcome = outcome.unwrap();
        assert_eq!(outcome.sitemaps, vec!["https://a.test/sitemap.xml".to_string()]);

        // Pretend the process died after the fetch step.
        journal.set_state(flow_id, FlowState::Saving).await.unwrap();

        let resumed = worker.resume_pending().await.unwrap();
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].flow_id, flow_id);
        assert!(resumed[0].is_ok());
        assert_eq!(activities.robots_fetches.load(Ordering::SeqCst), 1);
        assert!(worker.resume_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_leaves_flow_resumable() {
        let journal = FlowJournal::new(Database::open_in_memory().unwrap());
        let worker = Worker::new(Arc::new(CountingActivities::default()), journal.clone(), 1);
        worker.shutdown();

        let run = worker.spawn(robots_request()).await.unwrap();
        assert!(run.result.unwrap_err().is_cancelled());
        assert_eq!(journal.pending_flows().await.unwrap().len(), 1);
    }
}
