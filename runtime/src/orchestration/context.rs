//! The durable step engine.
//!
//! A [`FlowContext`] numbers the steps of one flow instance in call order.
//! Before running a step it looks in the journal: a completed entry for that
//! sequence number is replayed instead of executed, and earlier `started`
//! entries count toward the attempt budget. A flow that is re-run after a
//! crash therefore skips finished work and resumes its retry schedule.

use crate::error::{FailureStage, FlowError, IngestError};
use crate::orchestration::activities::Step;
use crate::orchestration::retry::{sleep_with_cancellation, RetryPolicy};
use crate::orchestration::state::{FlowKind, FlowState};
use crate::storage::{FlowJournal, StepStatus};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct FlowContext {
    flow_id: Uuid,
    kind: FlowKind,
    state: FlowState,
    seq: u32,
    journal: FlowJournal,
    cancel: CancellationToken,
}

impl FlowContext {
    pub fn new(
        flow_id: Uuid,
        kind: FlowKind,
        journal: FlowJournal,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            flow_id,
            kind,
            state: FlowState::Start,
            seq: 0,
            journal,
            cancel,
        }
    }

    pub fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Move to `next`, persisting the new state before anything else runs.
    pub async fn transition(&mut self, next: FlowState) -> Result<(), FlowError> {
        if !self.state.can_transition(self.kind, next) {
            return Err(journal_error(IngestError::Internal(format!(
                "{} flow cannot move from {} to {}",
                self.kind, self.state, next
            ))));
        }
        self.journal
            .set_state(self.flow_id, next)
            .await
            .map_err(journal_error)?;
        debug!(flow_id = %self.flow_id, from = %self.state, to = %next, "flow state changed");
        self.state = next;
        Ok(())
    }

    /// Run `op` as the next step of this flow under `policy`.
    ///
    /// Failures are reported with the step's stage; journal failures with
    /// [`FailureStage::Journal`].
    pub async fn step<T, F, Fut>(
        &mut self,
        step: Step,
        policy: &RetryPolicy,
        mut op: F,
    ) -> Result<T, FlowError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IngestError>>,
    {
        let seq = self.seq;
        self.seq += 1;
        let flow_id = self.flow_id;
        let stage = step.failure_stage();

        if let Some(done) = self
            .journal
            .completed_output(flow_id, seq)
            .await
            .map_err(journal_error)?
        {
            if done.step != step.name() {
                return Err(journal_error(IngestError::Internal(format!(
                    "journal has {} at step {seq}, flow asked for {step}",
                    done.step
                ))));
            }
            debug!(%flow_id, %step, seq, "replaying completed step");
            return serde_json::from_value(done.output)
                .map_err(|e| journal_error(IngestError::Serialization(e)));
        }

        let mut attempt = self
            .journal
            .started_attempts(flow_id, seq)
            .await
            .map_err(journal_error)?;

        loop {
            if self.cancel.is_cancelled() {
                return Err(FlowError::new(stage, IngestError::Cancelled));
            }

            attempt += 1;
            self.journal
                .record(flow_id, seq, step.name(), StepStatus::Started, attempt, None, None)
                .await
                .map_err(journal_error)?;

            let result = match tokio::time::timeout(policy.step_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(IngestError::Timeout {
                    step: step.name(),
                    timeout_secs: policy.step_timeout.as_secs(),
                }),
            };

            match result {
                Ok(value) => {
                    let output = serde_json::to_value(&value)
                        .map_err(|e| FlowError::new(stage, e.into()))?;
                    self.journal
                        .record(
                            flow_id,
                            seq,
                            step.name(),
                            StepStatus::Completed,
                            attempt,
                            Some(&output),
                            None,
                        )
                        .await
                        .map_err(journal_error)?;
                    debug!(%flow_id, %step, attempt, "step completed");
                    return Ok(value);
                }
                Err(err) => {
                    self.journal
                        .record(
                            flow_id,
                            seq,
                            step.name(),
                            StepStatus::Failed,
                            attempt,
                            None,
                            Some(err.to_string()),
                        )
                        .await
                        .map_err(journal_error)?;

                    if !err.is_retryable() {
                        warn!(%flow_id, %step, attempt, error = %err, "step failed permanently");
                        return Err(FlowError::new(stage, err));
                    }
                    if policy.is_exhausted(attempt) {
                        warn!(%flow_id, %step, attempt, error = %err, "step retry budget exhausted");
                        return Err(FlowError::new(
                            stage,
                            IngestError::Exhausted {
                                attempts: attempt,
                                last: Box::new(err),
                            },
                        ));
                    }

                    let delay = policy.delay_after(attempt);
                    warn!(
                        %flow_id,
                        %step,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "step failed; retrying"
                    );
                    sleep_with_cancellation(delay, &self.cancel)
                        .await
                        .map_err(|e| FlowError::new(stage, e))?;
                }
            }
        }
    }

    /// Record the flow's terminal result in the journal.
    ///
    /// A cancelled flow is left in its current state so it can be resumed.
    pub async fn finish<T: Serialize>(
        &mut self,
        result: &Result<T, FlowError>,
    ) -> Result<(), FlowError> {
        match result {
            Ok(outcome) => {
                if !self.state.can_transition(self.kind, FlowState::Done) {
                    return Err(journal_error(IngestError::Internal(format!(
                        "{} flow cannot finish from {}",
                        self.kind, self.state
                    ))));
                }
                let outcome = serde_json::to_value(outcome).map_err(|e| journal_error(e.into()))?;
                self.journal
                    .complete(self.flow_id, &outcome)
                    .await
                    .map_err(journal_error)?;
                self.state = FlowState::Done;
                info!(flow_id = %self.flow_id, kind = %self.kind, "flow done");
            }
            Err(err) if err.is_cancelled() => {
                info!(flow_id = %self.flow_id, state = %self.state, "flow cancelled; left resumable");
            }
            Err(err) => {
                error!(flow_id = %self.flow_id, kind = %self.kind, error = %err, "flow failed");
                if let Err(journal) = self.journal.fail(self.flow_id, &err.to_string()).await {
                    error!(flow_id = %self.flow_id, error = %journal, "could not record flow failure");
                }
                self.state = FlowState::Failed;
            }
        }
        Ok(())
    }
}

fn journal_error(err: IngestError) -> FlowError {
    FlowError::new(FailureStage::Journal, err)
}
