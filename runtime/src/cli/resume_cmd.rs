//! `crawl-ingest resume` — finish flows left behind by an earlier run.

use crate::cli::output::{self, Styled};
use crate::cli::Services;
use anyhow::{bail, Result};

pub async fn run(services: &Services) -> Result<()> {
    let s = Styled::new();
    let runs = services.worker.resume_pending().await?;

    if output::is_json() {
        let flows: Vec<_> = runs
            .iter()
            .map(|run| match &run.result {
                Ok(outcome) => serde_json::json!({
                    "flow_id": run.flow_id,
                    "kind": run.kind,
                    "outcome": outcome,
                }),
                Err(err) => serde_json::json!({
                    "flow_id": run.flow_id,
                    "kind": run.kind,
                    "error": err.to_string(),
                }),
            })
            .collect();
        output::print_json(&serde_json::json!({ "resumed": flows }));
    } else if !output::is_quiet() {
        if runs.is_empty() {
            eprintln!("  No unfinished flows.");
        }
        for run in &runs {
            match &run.result {
                Ok(_) => eprintln!("  {} {} {}", s.ok_sym(), run.kind, run.flow_id),
                Err(err) => eprintln!("  {} {} {}: {err}", s.fail_sym(), run.kind, run.flow_id),
            }
        }
    }

    let failed = runs.iter().filter(|run| !run.is_ok()).count();
    if failed > 0 {
        bail!("{failed} resumed flow(s) failed");
    }
    Ok(())
}
