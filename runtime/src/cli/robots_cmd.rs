//! `crawl-ingest robots` — ingest one site's robots.txt.

use crate::cli::output::{self, Styled};
use crate::cli::Services;
use crate::orchestration::RobotsRequest;
use anyhow::Result;

pub async fn run(services: &Services, entity: &str, url: &str, upload: Option<&str>) -> Result<()> {
    let s = Styled::new();
    let (flow_id, result) = services
        .worker
        .run_robots(RobotsRequest {
            upload_id: upload.map(str::to_string),
            entity_id: entity.to_string(),
            url: url.to_string(),
        })
        .await;
    let outcome = result?;

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "flow_id": flow_id,
            "upload_id": outcome.upload_id,
            "robots_id": outcome.robots_id,
            "sitemaps": outcome.sitemaps,
        }));
        return Ok(());
    }

    if !output::is_quiet() {
        eprintln!("  {} Stored robots.txt for {url}", s.ok_sym());
        output::print_field("upload", &outcome.upload_id.to_string());
        output::print_field("robots", &outcome.robots_id.to_string());
        if outcome.sitemaps.is_empty() {
            output::print_field("sitemaps", &s.dim("none declared"));
        }
        for sitemap in &outcome.sitemaps {
            output::print_field("sitemap", sitemap);
        }
        if output::is_verbose() {
            output::print_field("flow", &flow_id.to_string());
        }
    }
    Ok(())
}
