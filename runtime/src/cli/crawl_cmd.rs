//! `crawl-ingest crawl` — robots.txt plus the whole sitemap tree.

use crate::cli::output::{self, Styled};
use crate::cli::Services;
use anyhow::Result;
use std::time::Instant;

pub async fn run(
    services: &Services,
    entity: &str,
    url: &str,
    upload: Option<&str>,
    max_depth: usize,
) -> Result<()> {
    let s = Styled::new();
    let start = Instant::now();

    if !output::is_quiet() && !output::is_json() {
        eprintln!("  Crawling {url}...");
    }

    let report = services.walker(max_depth).crawl(entity, url, upload).await?;

    if output::is_json() {
        let mut value = serde_json::to_value(&report)?;
        value["duration_ms"] = serde_json::json!(start.elapsed().as_millis() as u64);
        output::print_json(&value);
        return Ok(());
    }

    if !output::is_quiet() {
        let sym = if report.failed_flows == 0 {
            s.ok_sym()
        } else {
            s.warn_sym()
        };
        eprintln!(
            "  {sym} Crawl finished in {:.1}s",
            start.elapsed().as_secs_f64()
        );
        output::print_field("upload", &report.upload_id.to_string());
        output::print_field("robots", &report.robots_id.to_string());
        output::print_field("levels", &report.levels.to_string());
        output::print_field("sitemaps", &report.sitemap_flows.to_string());
        output::print_field("index rows", &report.index_records.to_string());
        output::print_field("urlset rows", &report.urlset_records.to_string());
        output::print_field("empty", &report.empty_documents.to_string());
        if report.truncated > 0 {
            output::print_field(
                "truncated",
                &s.yellow(&format!("{} (max depth {max_depth})", report.truncated)),
            );
        }
        if report.failed_flows > 0 {
            output::print_field("failed", &s.red(&report.failed_flows.to_string()));
            for err in &report.errors {
                eprintln!("      {}", s.dim(err));
            }
        }
    }
    Ok(())
}
