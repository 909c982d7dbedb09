//! `crawl-ingest sitemap` — ingest a single sitemap document.

use crate::cli::output::{self, Styled};
use crate::cli::Services;
use crate::orchestration::SitemapRequest;
use anyhow::Result;

pub struct SitemapArgs<'a> {
    pub entity: &'a str,
    pub robots: &'a str,
    pub url: &'a str,
    pub origin: Option<&'a str>,
    pub upload: Option<&'a str>,
}

pub async fn run(services: &Services, args: SitemapArgs<'_>) -> Result<()> {
    let s = Styled::new();
    let (flow_id, result) = services
        .worker
        .run_sitemap(SitemapRequest {
            upload_id: args.upload.map(str::to_string),
            entity_id: args.entity.to_string(),
            robots_id: args.robots.to_string(),
            origin_id: args.origin.map(str::to_string),
            url: args.url.to_string(),
        })
        .await;
    let outcome = result?;

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "flow_id": flow_id,
            "upload_id": outcome.upload_id,
            "kind": outcome.kind,
            "rows": outcome.rows,
        }));
        return Ok(());
    }

    if !output::is_quiet() {
        eprintln!(
            "  {} {} sitemap, {} record(s) stored",
            s.ok_sym(),
            outcome.kind,
            outcome.rows
        );
        output::print_field("upload", &outcome.upload_id.to_string());
        if output::is_verbose() {
            output::print_field("flow", &flow_id.to_string());
        }
    }
    Ok(())
}
