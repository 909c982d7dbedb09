//! `crawl-ingest staging` — staging store maintenance.

use crate::cli::output::{self, Styled};
use crate::cli::Services;
use anyhow::Result;

/// Delete expired staging entries.
pub async fn run_purge(services: &Services) -> Result<()> {
    let s = Styled::new();
    let removed = services.staging.purge_expired().await?;

    if output::is_json() {
        output::print_json(&serde_json::json!({ "purged": removed }));
    } else if !output::is_quiet() {
        if removed > 0 {
            eprintln!("  {} Purged {removed} expired staging entries.", s.ok_sym());
        } else {
            eprintln!("  No expired staging entries.");
        }
    }
    Ok(())
}
