//! robots.txt helpers: locating the file and reading its `Sitemap:` directives.

use crate::error::IngestError;
use url::Url;

/// Build the robots.txt URL for a site base URL.
///
/// The base is validated as an absolute http(s) URL; a trailing `/` is
/// dropped before `/robots.txt` is appended.
pub fn robots_url(base_url: &str) -> Result<String, IngestError> {
    let trimmed = base_url.trim().trim_end_matches('/');
    let parsed = Url::parse(trimmed)
        .map_err(|e| IngestError::InvalidInput(format!("base url {base_url:?}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(IngestError::InvalidInput(format!(
            "base url {base_url:?} must use http or https"
        )));
    }
    Ok(format!("{trimmed}/robots.txt"))
}

/// Collect the `Sitemap:` directives of a robots.txt body.
///
/// Sitemap directives are global, so user-agent groups are ignored. Relative
/// locations are resolved against `base_url`; duplicates keep their first
/// position.
pub fn sitemap_directives(txt: &str, base_url: &str) -> Vec<String> {
    let base = Url::parse(&format!("{}/", base_url.trim().trim_end_matches('/'))).ok();
    let mut sitemaps: Vec<String> = Vec::new();

    for line in txt.lines() {
        // Remove inline comments
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("sitemap") {
            continue;
        }

        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        let resolved = match Url::parse(value) {
            Ok(url) => Some(url.to_string()),
            Err(url::ParseError::RelativeUrlWithoutBase) => base
                .as_ref()
                .and_then(|b| b.join(value).ok())
                .map(|u| u.to_string()),
            Err(_) => None,
        };

        if let Some(url) = resolved {
            if !sitemaps.contains(&url) {
                sitemaps.push(url);
            }
        }
    }

    sitemaps
}
