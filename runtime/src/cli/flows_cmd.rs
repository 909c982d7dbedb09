//! `crawl-ingest flows` — list recent flow instances.

use crate::cli::output::{self, Styled};
use crate::cli::Services;
use crate::orchestration::FlowState;
use anyhow::Result;
use chrono::Utc;

pub async fn run(services: &Services, limit: usize) -> Result<()> {
    let s = Styled::new();
    let flows = services.journal.list_flows(limit).await?;

    if output::is_json() {
        output::print_json(&serde_json::to_value(&flows)?);
        return Ok(());
    }

    if flows.is_empty() {
        if !output::is_quiet() {
            eprintln!("  No flows recorded yet.");
        }
        return Ok(());
    }

    let now = Utc::now().timestamp_millis();
    for flow in &flows {
        let state = match flow.state {
            FlowState::Done => s.green(flow.state.as_str()),
            FlowState::Failed => s.red(flow.state.as_str()),
            other => s.yellow(other.as_str()),
        };
        let age = output::format_duration(((now - flow.updated_at).max(0) / 1000) as u64);
        eprintln!(
            "  {}  {:<8} {:<20} {}",
            flow.flow_id,
            flow.kind.as_str(),
            state,
            s.dim(&format!("{age} ago"))
        );
        if let Some(err) = &flow.error {
            eprintln!("      {}", s.dim(err));
        }
        if output::is_verbose() {
            for step in services.journal.steps(flow.flow_id).await? {
                eprintln!(
                    "      #{} {:<20} {:<10} attempt {}",
                    step.seq, step.step, step.status, step.attempt
                );
            }
        }
    }
    Ok(())
}
