//! HTTP fetching for robots.txt and sitemap documents.
//!
//! Every request carries the same header profile: a configured user agent, an
//! `Accept` type matching the document, compression-accepting
//! `Accept-Encoding`, and navigation fetch metadata so the request looks like
//! a top-level page load. The fetcher never retries; retry policy belongs to
//! the step engine.

use crate::error::IngestError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, USER_AGENT};
use std::time::Duration;
use tracing::debug;

/// Encodings the fetcher advertises (and reqwest decodes).
pub const ACCEPT_ENCODINGS: &str = "gzip, deflate, br, zstd";

/// The content type a fetch expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    /// robots.txt
    PlainText,
    /// sitemap documents
    Xml,
}

impl Accept {
    pub fn mime(self) -> &'static str {
        match self {
            Accept::PlainText => "text/plain",
            Accept::Xml => "application/xml",
        }
    }
}

/// Retrieves a document body.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url` and return the full response body.
    async fn fetch(&self, url: &str, accept: Accept) -> Result<Vec<u8>, IngestError>;
}

/// [`Fetcher`] backed by a shared reqwest client.
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: HeaderValue,
}

impl HttpFetcher {
    /// Build a fetcher with the given user agent and per-request timeout.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, IngestError> {
        let user_agent = HeaderValue::from_str(user_agent)
            .map_err(|e| IngestError::InvalidInput(format!("user agent {user_agent:?}: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| IngestError::Internal(format!("building HTTP client: {e}")))?;

        Ok(Self { client, user_agent })
    }

    /// The header profile sent with every request.
    pub fn headers(&self, accept: Accept) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, self.user_agent.clone());
        headers.insert(ACCEPT, HeaderValue::from_static(accept.mime()));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(ACCEPT_ENCODINGS));
        headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
        headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
        headers.insert("sec-fetch-user", HeaderValue::from_static("?1"));
        headers
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, accept: Accept) -> Result<Vec<u8>, IngestError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| IngestError::InvalidInput(format!("url {url:?}: {e}")))?;

        let resp = self
            .client
            .get(parsed)
            .headers(self.headers(accept))
            .send()
            .await
            .map_err(|e| transport(url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(IngestError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = resp.bytes().await.map_err(|e| transport(url, e))?;
        debug!(url, bytes = body.len(), "fetched document");
        Ok(body.to_vec())
    }
}

fn transport(url: &str, err: reqwest::Error) -> IngestError {
    let message = if err.is_timeout() {
        format!("timed out: {err}")
    } else if err.is_connect() {
        format!("connect error: {err}")
    } else {
        err.to_string()
    };
    IngestError::Transport {
        url: url.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new("crawl-ingest-test/1.0", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_sends_header_profile() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\n"))
            .mount(&server)
            .await;

        let url = format!("{}/robots.txt", server.uri());
        let body = fetcher().fetch(&url, Accept::PlainText).await.unwrap();
        assert_eq!(body, b"User-agent: *\n");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let headers = &requests[0].headers;
        let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
        assert_eq!(get("user-agent").as_deref(), Some("crawl-ingest-test/1.0"));
        assert_eq!(get("accept").as_deref(), Some("text/plain"));
        assert_eq!(get("accept-encoding").as_deref(), Some(ACCEPT_ENCODINGS));
        assert_eq!(get("sec-fetch-dest").as_deref(), Some("document"));
        assert_eq!(get("sec-fetch-mode").as_deref(), Some("navigate"));
        assert_eq!(get("sec-fetch-user").as_deref(), Some("?1"));
    }

    #[tokio::test]
    async fn test_fetch_xml_accept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sitemap.xml"))
            .and(header("accept", "application/xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<urlset/>"))
            .mount(&server)
            .await;

        let url = format!("{}/sitemap.xml", server.uri());
        let body = fetcher().fetch(&url, Accept::Xml).await.unwrap();
        assert_eq!(body, b"<urlset/>");
    }

    #[tokio::test]
    async fn test_non_success_status_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let url = format!("{}/sitemap.xml", server.uri());
        let err = fetcher().fetch(&url, Accept::Xml).await.unwrap_err();
        assert!(matches!(err, IngestError::HttpStatus { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let err = fetcher()
            .fetch(&format!("http://127.0.0.1:{port}/robots.txt"), Accept::PlainText)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Transport { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_invalid_url_is_not_retryable() {
        let err = fetcher().fetch("not a url", Accept::Xml).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
