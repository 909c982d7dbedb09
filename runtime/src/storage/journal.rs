//! Append-only flow journal.
//!
//! `flows` holds one row per flow instance: its kind, resolved input, current
//! state and terminal error or outcome. `flow_steps` is append-only; each step
//! attempt writes a `started` row followed by `completed` or `failed`. Replay
//! and attempt counting are both derived from these rows.

use crate::error::IngestError;
use crate::orchestration::state::{FlowKind, FlowState};
use crate::storage::db::Database;
use crate::storage::records::uuid_at;
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Status of one journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Started,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Started => "started",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(StepStatus::Started),
            "completed" => Some(StepStatus::Completed),
            "failed" => Some(StepStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One flow instance as stored in `flows`.
#[derive(Debug, Clone, Serialize)]
pub struct FlowRow {
    pub flow_id: Uuid,
    pub kind: FlowKind,
    pub input: Value,
    pub state: FlowState,
    pub error: Option<String>,
    pub outcome: Option<Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One row of `flow_steps`.
#[derive(Debug, Clone, Serialize)]
pub struct StepEntry {
    pub seq: u32,
    pub step: String,
    pub status: StepStatus,
    pub attempt: u32,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub recorded_at: i64,
}

/// A completed step found during replay.
#[derive(Debug, Clone)]
pub struct CompletedStep {
    pub step: String,
    pub output: Value,
}

/// Durable record of flow instances and their step attempts.
#[derive(Clone)]
pub struct FlowJournal {
    db: Database,
}

impl FlowJournal {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register a flow. Returns `false` if the ID was already known, in which
    /// case the stored row is left untouched.
    pub async fn create_flow(
        &self,
        flow_id: Uuid,
        kind: FlowKind,
        input: &Value,
    ) -> Result<bool, IngestError> {
        let input = serde_json::to_string(input)?;
        self.db
            .call(move |conn| {
                let now = now_millis();
                let inserted = conn.execute(
                    "INSERT INTO flows (flow_id, kind, input, state, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                     ON CONFLICT(flow_id) DO NOTHING",
                    params![
                        flow_id.to_string(),
                        kind.as_str(),
                        input,
                        FlowState::Start.as_str(),
                        now
                    ],
                )?;
                Ok(inserted == 1)
            })
            .await
    }

    pub async fn set_state(&self, flow_id: Uuid, state: FlowState) -> Result<(), IngestError> {
        self.update(flow_id, state, None, None).await
    }

    /// Mark the flow `Done` and store its outcome.
    pub async fn complete(&self, flow_id: Uuid, outcome: &Value) -> Result<(), IngestError> {
        let outcome = serde_json::to_string(outcome)?;
        self.update(flow_id, FlowState::Done, None, Some(outcome)).await
    }

    /// Mark the flow `Failed` with its terminal error text.
    pub async fn fail(&self, flow_id: Uuid, error: &str) -> Result<(), IngestError> {
        self.update(flow_id, FlowState::Failed, Some(error.to_string()), None)
            .await
    }

    async fn update(
        &self,
        flow_id: Uuid,
        state: FlowState,
        error: Option<String>,
        outcome: Option<String>,
    ) -> Result<(), IngestError> {
        self.db
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE flows SET state = ?2, error = ?3, outcome = ?4, updated_at = ?5
                     WHERE flow_id = ?1",
                    params![flow_id.to_string(), state.as_str(), error, outcome, now_millis()],
                )?;
                if updated == 0 {
                    return Err(IngestError::Internal(format!("unknown flow {flow_id}")));
                }
                Ok(())
            })
            .await
    }

    /// Append one step entry.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        flow_id: Uuid,
        seq: u32,
        step: &'static str,
        status: StepStatus,
        attempt: u32,
        output: Option<&Value>,
        error: Option<String>,
    ) -> Result<(), IngestError> {
        let output = output.map(serde_json::to_string).transpose()?;
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO flow_steps (flow_id, seq, step, status, attempt, output, error, recorded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        flow_id.to_string(),
                        seq,
                        step,
                        status.as_str(),
                        attempt,
                        output,
                        error,
                        now_millis()
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// The stored output of step `seq`, if it ever completed.
    pub async fn completed_output(
        &self,
        flow_id: Uuid,
        seq: u32,
    ) -> Result<Option<CompletedStep>, IngestError> {
        let row = self
            .db
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT step, output FROM flow_steps
                         WHERE flow_id = ?1 AND seq = ?2 AND status = 'completed'
                         ORDER BY id DESC LIMIT 1",
                        params![flow_id.to_string(), seq],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        match row {
            Some((step, output)) => {
                let output = match output {
                    Some(text) => serde_json::from_str(&text)?,
                    None => Value::Null,
                };
                Ok(Some(CompletedStep { step, output }))
            }
            None => Ok(None),
        }
    }

    /// How many attempts of step `seq` have been started.
    pub async fn started_attempts(&self, flow_id: Uuid, seq: u32) -> Result<u32, IngestError> {
        self.db
            .call(move |conn| {
                let count: u32 = conn.query_row(
                    "SELECT COUNT(*) FROM flow_steps
                     WHERE flow_id = ?1 AND seq = ?2 AND status = 'started'",
                    params![flow_id.to_string(), seq],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
    }

    pub async fn flow(&self, flow_id: Uuid) -> Result<Option<FlowRow>, IngestError> {
        self.db
            .call(move |conn| {
                let row = conn
                    .query_row(
                        &format!("{FLOW_COLUMNS} WHERE flow_id = ?1"),
                        params![flow_id.to_string()],
                        flow_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await
    }

    /// Flows not yet `Done` or `Failed`, oldest first.
    pub async fn pending_flows(&self) -> Result<Vec<FlowRow>, IngestError> {
        self.db
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "{FLOW_COLUMNS} WHERE state NOT IN ('done', 'failed') ORDER BY created_at, flow_id"
                ))?;
                let rows = stmt
                    .query_map([], flow_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Most recently updated flows.
    pub async fn list_flows(&self, limit: usize) -> Result<Vec<FlowRow>, IngestError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{FLOW_COLUMNS} ORDER BY updated_at DESC, flow_id LIMIT ?1"
                ))?;
                let rows = stmt
                    .query_map(params![limit as i64], flow_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Every step entry of a flow in append order.
    pub async fn steps(&self, flow_id: Uuid) -> Result<Vec<StepEntry>, IngestError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT seq, step, status, attempt, output, error, recorded_at
                     FROM flow_steps WHERE flow_id = ?1 ORDER BY id",
                )?;
                let rows = stmt
                    .query_map(params![flow_id.to_string()], |row| {
                        let status: String = row.get(2)?;
                        Ok(StepEntry {
                            seq: row.get(0)?,
                            step: row.get(1)?,
                            status: StepStatus::parse(&status)
                                .ok_or_else(|| bad_text(2, format!("step status {status:?}")))?,
                            attempt: row.get(3)?,
                            output: json_at(row, 4)?,
                            error: row.get(5)?,
                            recorded_at: row.get(6)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

const FLOW_COLUMNS: &str =
    "SELECT flow_id, kind, input, state, error, outcome, created_at, updated_at FROM flows";

fn flow_row(row: &Row<'_>) -> rusqlite::Result<FlowRow> {
    let kind: String = row.get(1)?;
    let state: String = row.get(3)?;
    Ok(FlowRow {
        flow_id: uuid_at(row, 0)?,
        kind: kind.parse().map_err(|e: String| bad_text(1, e))?,
        input: json_at(row, 2)?.unwrap_or(Value::Null),
        state: state.parse().map_err(|e: String| bad_text(3, e))?,
        error: row.get(4)?,
        outcome: json_at(row, 5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn json_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Value>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        serde_json::from_str(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn bad_text(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
