//! Sitemap document parsing and classification.
//!
//! A fetched sitemap is read by two independent strategies over the same
//! immutable buffer: the index strategy collects `<sitemap>` entries, the
//! urlset strategy collects `<url>` entries. [`parse_sitemap`] always runs
//! both and then classifies the document. Index entries win when both
//! strategies find something.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Bytes of document context kept on each side of a parse error.
const EXCERPT_RADIUS: usize = 80;

/// Which of the two parse strategies produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Index,
    Urlset,
}

impl Strategy {
    fn entry_tag(self) -> &'static [u8] {
        match self {
            Strategy::Index => b"sitemap",
            Strategy::Urlset => b"url",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Index => f.write_str("index"),
            Strategy::Urlset => f.write_str("urlset"),
        }
    }
}

/// Malformed content found by a strategy.
#[derive(Debug, Clone, Error)]
#[error("malformed sitemap ({strategy} strategy) at byte {position}: {message}")]
pub struct ParseError {
    pub strategy: Strategy,
    pub position: u64,
    pub message: String,
    /// Document text around `position`.
    pub excerpt: String,
}

/// A child sitemap listed by an index document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub location: String,
    /// Epoch milliseconds; `None` when the document gave no usable `lastmod`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
}

/// A leaf page listed by a urlset document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlsetEntry {
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_frequency: Option<String>,
}

/// Document classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SitemapKind {
    Index,
    Urlset,
    Empty,
}

impl fmt::Display for SitemapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SitemapKind::Index => f.write_str("index"),
            SitemapKind::Urlset => f.write_str("urlset"),
            SitemapKind::Empty => f.write_str("empty"),
        }
    }
}

/// A classified sitemap document.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedSitemap {
    Index(Vec<IndexEntry>),
    Urlset(Vec<UrlsetEntry>),
    Empty,
}

impl ParsedSitemap {
    pub fn kind(&self) -> SitemapKind {
        match self {
            ParsedSitemap::Index(_) => SitemapKind::Index,
            ParsedSitemap::Urlset(_) => SitemapKind::Urlset,
            ParsedSitemap::Empty => SitemapKind::Empty,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ParsedSitemap::Index(entries) => entries.len(),
            ParsedSitemap::Urlset(entries) => entries.len(),
            ParsedSitemap::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What one strategy collected, plus the error that stopped it (if any).
#[derive(Debug, Clone)]
pub struct StrategyOutcome<T> {
    pub entries: Vec<T>,
    pub error: Option<ParseError>,
}

/// Parse and classify a sitemap document.
pub fn parse_sitemap(xml: &[u8]) -> Result<ParsedSitemap, ParseError> {
    classify(parse_index(xml), parse_urlset(xml))
}

/// Apply the precedence rule to both strategy outcomes.
///
/// An error is fatal only for the strategy whose entries are kept.
pub fn classify(
    index: StrategyOutcome<IndexEntry>,
    urlset: StrategyOutcome<UrlsetEntry>,
) -> Result<ParsedSitemap, ParseError> {
    if !index.entries.is_empty() {
        return match index.error {
            Some(err) => Err(err),
            None => Ok(ParsedSitemap::Index(index.entries)),
        };
    }

    if !urlset.entries.is_empty() {
        return match urlset.error {
            Some(err) => Err(err),
            None => Ok(ParsedSitemap::Urlset(urlset.entries)),
        };
    }

    for err in [index.error, urlset.error].into_iter().flatten() {
        warn!(
            strategy = %err.strategy,
            position = err.position,
            excerpt = %err.excerpt,
            "discarding unparseable sitemap with no entries: {}",
            err.message
        );
    }

    Ok(ParsedSitemap::Empty)
}

/// Index strategy: collect `<sitemap>` entries.
pub fn parse_index(xml: &[u8]) -> StrategyOutcome<IndexEntry> {
    scan_entries(xml, Strategy::Index, |fields| {
        let location = fields.loc?;
        Some(IndexEntry {
            last_modified: lastmod_millis(fields.lastmod.as_deref(), &location),
            location,
        })
    })
}

/// Urlset strategy: collect `<url>` entries.
pub fn parse_urlset(xml: &[u8]) -> StrategyOutcome<UrlsetEntry> {
    scan_entries(xml, Strategy::Urlset, |fields| {
        let location = fields.loc?;
        Some(UrlsetEntry {
            last_modified: lastmod_millis(fields.lastmod.as_deref(), &location),
            location,
            change_frequency: fields.changefreq,
        })
    })
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Loc,
    Lastmod,
    Changefreq,
}

impl Field {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"loc" => Some(Field::Loc),
            b"lastmod" => Some(Field::Lastmod),
            b"changefreq" => Some(Field::Changefreq),
            _ => None,
        }
    }
}

/// Text of the direct children of one entry element.
#[derive(Debug, Default)]
struct EntryFields {
    loc: Option<String>,
    lastmod: Option<String>,
    changefreq: Option<String>,
}

impl EntryFields {
    fn append(&mut self, field: Field, text: &str) {
        let slot = match field {
            Field::Loc => &mut self.loc,
            Field::Lastmod => &mut self.lastmod,
            Field::Changefreq => &mut self.changefreq,
        };
        slot.get_or_insert_with(String::new).push_str(text);
    }

    /// Mark `field` as present even if it carries no text.
    fn open(&mut self, field: Field) {
        if let Field::Changefreq = field {
            self.changefreq.get_or_insert_with(String::new);
        }
    }

    /// Trim `loc` and `lastmod`, dropping them when blank. `changefreq` is
    /// kept byte for byte.
    fn normalized(self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }
        Self {
            loc: clean(self.loc),
            lastmod: clean(self.lastmod),
            changefreq: self.changefreq,
        }
    }
}

fn scan_entries<T>(
    xml: &[u8],
    strategy: Strategy,
    mut build: impl FnMut(EntryFields) -> Option<T>,
) -> StrategyOutcome<T> {
    let entry_tag = strategy.entry_tag();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut entries = Vec::new();
    let mut current: Option<EntryFields> = None;
    // Depth below the open entry element; fields are only read at depth 1.
    let mut depth = 0usize;
    let mut field: Option<Field> = None;
    // Elements opened and not yet closed anywhere in the document.
    let mut open = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                open += 1;
                if current.is_none() {
                    if e.local_name().as_ref() == entry_tag {
                        current = Some(EntryFields::default());
                        depth = 0;
                    }
                } else {
                    depth += 1;
                    field = if depth == 1 {
                        Field::from_tag(e.local_name().as_ref())
                    } else {
                        None
                    };
                    if let (Some(fields), Some(f)) = (current.as_mut(), field) {
                        fields.open(f);
                    }
                }
            }
            Ok(Event::Empty(ref e)) => {
                if let Some(fields) = current.as_mut().filter(|_| depth == 0) {
                    if let Some(f) = Field::from_tag(e.local_name().as_ref()) {
                        fields.open(f);
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                open = open.saturating_sub(1);
                if current.is_some() {
                    if depth == 0 && e.local_name().as_ref() == entry_tag {
                        if let Some(entry) = current.take().and_then(|f| build(f.normalized())) {
                            entries.push(entry);
                        }
                    } else {
                        depth = depth.saturating_sub(1);
                    }
                    field = None;
                }
            }
            Ok(Event::Text(ref e)) => {
                if let (Some(fields), Some(f)) = (current.as_mut(), field) {
                    match e.unescape() {
                        Ok(text) => fields.append(f, &text),
                        Err(err) => {
                            let position = reader.buffer_position() as u64;
                            return StrategyOutcome {
                                entries,
                                error: Some(parse_error(strategy, xml, position, err.to_string())),
                            };
                        }
                    }
                }
            }
            Ok(Event::CData(ref e)) => {
                if let (Some(fields), Some(f)) = (current.as_mut(), field) {
                    fields.append(f, &String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::Eof) if open > 0 => {
                let position = reader.buffer_position() as u64;
                return StrategyOutcome {
                    entries,
                    error: Some(parse_error(
                        strategy,
                        xml,
                        position,
                        format!("document ended with {open} unclosed element(s)"),
                    )),
                };
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                let position = reader.buffer_position() as u64;
                return StrategyOutcome {
                    entries,
                    error: Some(parse_error(strategy, xml, position, err.to_string())),
                };
            }
            _ => {}
        }
        buf.clear();
    }

    StrategyOutcome {
        entries,
        error: None,
    }
}

fn parse_error(strategy: Strategy, xml: &[u8], position: u64, message: String) -> ParseError {
    ParseError {
        strategy,
        position,
        message,
        excerpt: excerpt(xml, position as usize),
    }
}

fn excerpt(xml: &[u8], position: usize) -> String {
    let position = position.min(xml.len());
    let start = position.saturating_sub(EXCERPT_RADIUS);
    let end = (position + EXCERPT_RADIUS).min(xml.len());
    String::from_utf8_lossy(&xml[start..end]).into_owned()
}

fn lastmod_millis(raw: Option<&str>, location: &str) -> Option<i64> {
    let raw = raw?;
    let parsed = parse_lastmod(raw);
    if parsed.is_none() {
        warn!(url = location, lastmod = raw, "ignoring unparseable lastmod");
    }
    parsed
}

/// Convert a W3C datetime (`lastmod`) to epoch milliseconds in UTC.
///
/// Accepts full RFC 3339, minute precision with an offset, a date, a
/// year-month or a bare year. Timestamps without an offset are read as UTC.
pub fn parse_lastmod(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let zoned = match raw.strip_suffix('Z').or_else(|| raw.strip_suffix('z')) {
        Some(stem) => format!("{stem}+00:00"),
        None => raw.to_string(),
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&zoned) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_str(&zoned, "%Y-%m-%dT%H:%M%:z") {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.and_utc().timestamp_millis());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return midnight_millis(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d") {
        return midnight_millis(date);
    }
    if raw.len() == 4 {
        let year: i32 = raw.parse().ok()?;
        return NaiveDate::from_ymd_opt(year, 1, 1).and_then(midnight_millis);
    }

    None
}

fn midnight_millis(date: NaiveDate) -> Option<i64> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX_DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap>
    <loc>https://example.com/sitemap-posts.xml</loc>
    <lastmod>2024-01-15</lastmod>
  </sitemap>
  <sitemap>
    <loc>https://example.com/sitemap-pages.xml</loc>
    <lastmod>2024-01-15T10:30:00+02:00</lastmod>
  </sitemap>
</sitemapindex>"#;

    const URLSET_DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url>
    <loc>https://example.com/</loc>
    <lastmod>2024-01-15T10:30Z</lastmod>
    <changefreq>daily</changefreq>
    <priority>1.0</priority>
  </url>
  <url>
    <loc>https://example.com/about?a=1&amp;b=2</loc>
    <changefreq>Weekly</changefreq>
  </url>
</urlset>"#;

    #[test]
    fn test_index_document() {
        let parsed = parse_sitemap(INDEX_DOC.as_bytes()).unwrap();
        let ParsedSitemap::Index(entries) = parsed else {
            panic!("expected index, got {parsed:?}");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].location, "https://example.com/sitemap-posts.xml");
        assert_eq!(entries[0].last_modified, Some(1_705_276_800_000));
        assert_eq!(entries[1].last_modified, Some(1_705_307_400_000));
    }

    #[test]
    fn test_urlset_document() {
        let parsed = parse_sitemap(URLSET_DOC.as_bytes()).unwrap();
        let ParsedSitemap::Urlset(entries) = parsed else {
            panic!("expected urlset, got {parsed:?}");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].last_modified, Some(1_705_314_600_000));
        assert_eq!(entries[0].change_frequency.as_deref(), Some("daily"));
        // Entities are unescaped, changefreq is kept verbatim.
        assert_eq!(entries[1].location, "https://example.com/about?a=1&b=2");
        assert_eq!(entries[1].change_frequency.as_deref(), Some("Weekly"));
        assert_eq!(entries[1].last_modified, None);
    }

    #[test]
    fn test_index_wins_tie() {
        let xml = r#"<root>
            <sitemap><loc>https://example.com/child.xml</loc></sitemap>
            <url><loc>https://example.com/page</loc></url>
        </root>"#;
        let parsed = parse_sitemap(xml.as_bytes()).unwrap();
        assert_eq!(parsed.kind(), SitemapKind::Index);
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn test_empty_document() {
        let xml = r#"<?xml version="1.0"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9"></urlset>"#;
        assert_eq!(parse_sitemap(xml.as_bytes()).unwrap(), ParsedSitemap::Empty);
        assert_eq!(parse_sitemap(b"").unwrap(), ParsedSitemap::Empty);
    }

    #[test]
    fn test_entries_without_loc_are_skipped() {
        let xml = r#"<urlset>
            <url><lastmod>2024-01-01</lastmod></url>
            <url><loc>   </loc></url>
            <url><loc>https://example.com/kept</loc></url>
        </urlset>"#;
        let parsed = parse_sitemap(xml.as_bytes()).unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn test_nested_extension_loc_ignored() {
        let xml = r#"<urlset xmlns:image="http://www.google.com/schemas/sitemap-image/1.1">
            <url>
                <loc>https://example.com/gallery</loc>
                <image:image><image:loc>https://cdn.example.com/a.jpg</image:loc></image:image>
            </url>
        </urlset>"#;
        let ParsedSitemap::Urlset(entries) = parse_sitemap(xml.as_bytes()).unwrap() else {
            panic!("expected urlset");
        };
        assert_eq!(entries[0].location, "https://example.com/gallery");
    }

    #[test]
    fn test_prefixed_and_cdata() {
        let xml = r#"<sm:urlset xmlns:sm="http://www.sitemaps.org/schemas/sitemap/0.9">
            <sm:url><sm:loc><![CDATA[https://example.com/cdata]]></sm:loc></sm:url>
        </sm:urlset>"#;
        let ParsedSitemap::Urlset(entries) = parse_sitemap(xml.as_bytes()).unwrap() else {
            panic!("expected urlset");
        };
        assert_eq!(entries[0].location, "https://example.com/cdata");
    }

    #[test]
    fn test_error_in_winning_strategy_is_fatal() {
        let xml = r#"<urlset>
            <url><loc>https://example.com/a</loc></url>
            <url><loc>https://example.com/b</loc></urx>
        </urlset>"#;
        let err = parse_sitemap(xml.as_bytes()).unwrap_err();
        assert_eq!(err.strategy, Strategy::Urlset);
        assert!(!err.excerpt.is_empty());
    }

    #[test]
    fn test_unclosed_root_is_fatal() {
        let xml = b"<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\
            <url><loc>https://a.test/1</loc></url>\
            <url><loc>https://a.test/2</loc></url>";
        let err = parse_sitemap(xml).unwrap_err();
        assert_eq!(err.strategy, Strategy::Urlset);
        assert!(err.excerpt.contains("https://a.test/2"));
    }

    #[test]
    fn test_document_cut_inside_loc_is_fatal() {
        let xml = b"<urlset><url><loc>https://a.test/1</loc></url><url><loc>https://a.test/2";
        let err = parse_sitemap(xml).unwrap_err();
        assert_eq!(err.strategy, Strategy::Urlset);
        assert!(err.excerpt.contains("https://a.test/2"));
    }

    #[test]
    fn test_truncated_index_is_fatal() {
        let xml = b"<sitemapindex><sitemap><loc>https://a.test/s.xml</loc></sitemap>";
        let err = parse_sitemap(xml).unwrap_err();
        assert_eq!(err.strategy, Strategy::Index);
    }

    #[test]
    fn test_changefreq_kept_byte_for_byte() {
        let xml = "<urlset>\n  <url>\n    <loc>\n https://a.test/x \n</loc>\n    \
                   <changefreq> daily\n</changefreq>\n  </url>\n  \
                   <url><loc>https://a.test/y</loc><changefreq></changefreq></url>\n  \
                   <url><loc>https://a.test/z</loc></url>\n</urlset>";
        let ParsedSitemap::Urlset(entries) = parse_sitemap(xml.as_bytes()).unwrap() else {
            panic!("expected urlset");
        };
        assert_eq!(entries[0].location, "https://a.test/x");
        assert_eq!(entries[0].change_frequency.as_deref(), Some(" daily\n"));
        assert_eq!(entries[1].change_frequency.as_deref(), Some(""));
        assert_eq!(entries[2].change_frequency, None);
    }

    #[test]
    fn test_error_in_losing_strategy_is_ignored() {
        let index = StrategyOutcome {
            entries: vec![IndexEntry {
                location: "https://example.com/child.xml".into(),
                last_modified: None,
            }],
            error: None,
        };
        let urlset = StrategyOutcome {
            entries: Vec::new(),
            error: Some(ParseError {
                strategy: Strategy::Urlset,
                position: 10,
                message: "bad".into(),
                excerpt: String::new(),
            }),
        };
        let parsed = classify(index, urlset).unwrap();
        assert_eq!(parsed.kind(), SitemapKind::Index);
    }

    #[test]
    fn test_garbage_without_entries_is_empty() {
        let parsed = parse_sitemap(b"<html><body></div></html>").unwrap();
        assert_eq!(parsed, ParsedSitemap::Empty);
    }

    #[test]
    fn test_parse_lastmod_forms() {
        assert_eq!(parse_lastmod("2024-01-15"), Some(1_705_276_800_000));
        assert_eq!(parse_lastmod("2024-01-15T00:00:00Z"), Some(1_705_276_800_000));
        assert_eq!(parse_lastmod("2024-01-15T00:00:00.500Z"), Some(1_705_276_800_500));
        assert_eq!(parse_lastmod("2024-01-15T02:00+02:00"), Some(1_705_276_800_000));
        assert_eq!(parse_lastmod("2024-01-15T00:00:00"), Some(1_705_276_800_000));
        assert_eq!(parse_lastmod("2024-01"), Some(1_704_067_200_000));
        assert_eq!(parse_lastmod("2024"), Some(1_704_067_200_000));
        assert_eq!(parse_lastmod("yesterday"), None);
        assert_eq!(parse_lastmod(""), None);
    }
}
