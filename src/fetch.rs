use std::fmt;
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error};
use url::Url;

/// One URL to scrape, tied to its 0-based data row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeTarget {
    pub row: usize,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailureKind {
    HttpError,
    TimedOut,
    InvalidUrl,
    OtherNetworkError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::HttpError => "http error",
            FailureKind::TimedOut => "timed out",
            FailureKind::InvalidUrl => "invalid url",
            FailureKind::OtherNetworkError => "network error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success { body: Vec<u8> },
    Failure { kind: FailureKind, reason: String },
}

impl FetchOutcome {
    fn failure(kind: FailureKind, reason: impl Into<String>) -> Self {
        FetchOutcome::Failure {
            kind,
            reason: reason.into(),
        }
    }
}

/// Anything that can turn a target into a fetch outcome.
///
/// The pipeline is generic over this so scenarios can run against canned pages.
pub trait Fetch {
    fn fetch(&self, target: &ScrapeTarget, total: usize) -> impl Future<Output = FetchOutcome>;
}

/// HTTP fetcher backed by a shared `reqwest::Client`.
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Fetcher { client })
    }

    async fn get(&self, url: Url) -> FetchOutcome {
        let response = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => return classify(e),
        };
        let response = match response.error_for_status() {
            Ok(resp) => resp,
            Err(e) => return FetchOutcome::failure(FailureKind::HttpError, e.to_string()),
        };
        match response.bytes().await {
            Ok(body) => FetchOutcome::Success {
                body: body.to_vec(),
            },
            Err(e) => classify(e),
        }
    }
}

impl Fetch for Fetcher {
    async fn fetch(&self, target: &ScrapeTarget, total: usize) -> FetchOutcome {
        let n = target.row + 1;
        debug!("sending request [{}/{}]: {}", n, total, target.url);

        let outcome = match parse_http_url(&target.url) {
            Ok(url) => self.get(url).await,
            Err(reason) => FetchOutcome::failure(FailureKind::InvalidUrl, reason),
        };

        match &outcome {
            FetchOutcome::Success { body } => {
                debug!(bytes = body.len(), "received response [{}/{}]: {}", n, total, target.url);
            }
            FetchOutcome::Failure { kind, reason } => {
                error!(kind = %kind, "data not retrieved because {} - URL: {}", reason, target.url);
            }
        }
        outcome
    }
}

/// Accept only absolute http(s) URLs with a host.
pub fn parse_http_url(raw: &str) -> std::result::Result<Url, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty url".into());
    }
    let url = Url::parse(trimmed).map_err(|e| format!("unparsable url: {}", e))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some_and(|h| !h.is_empty()) => Ok(url),
        "http" | "https" => Err("url has no host".into()),
        other => Err(format!("unsupported scheme: {}", other)),
    }
}

fn classify(e: reqwest::Error) -> FetchOutcome {
    let kind = if e.is_timeout() {
        FailureKind::TimedOut
    } else if e.is_builder() {
        FailureKind::InvalidUrl
    } else if e.is_status() {
        FailureKind::HttpError
    } else {
        FailureKind::OtherNetworkError
    };
    FetchOutcome::failure(kind, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(timeout_ms: u64) -> Fetcher {
        Fetcher::new(Duration::from_millis(timeout_ms), "yp_scraper-test").unwrap()
    }

    fn target(url: impl Into<String>) -> ScrapeTarget {
        ScrapeTarget {
            row: 0,
            url: url.into(),
        }
    }

    fn kind_of(outcome: &FetchOutcome) -> Option<FailureKind> {
        match outcome {
            FetchOutcome::Failure { kind, .. } => Some(*kind),
            FetchOutcome::Success { .. } => None,
        }
    }

    #[test]
    fn url_validation() {
        assert!(parse_http_url("https://www.yellowpages.com/x").is_ok());
        assert!(parse_http_url("  http://a.test  ").is_ok());
        assert!(parse_http_url("").is_err());
        assert!(parse_http_url("not a url").is_err());
        assert!(parse_http_url("ftp://a.test/file").is_err());
        assert!(parse_http_url("mailto:x@a.test").is_err());
        assert!(parse_http_url("http://").is_err());
    }

    #[tokio::test]
    async fn success_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/biz"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let outcome = fetcher(2000)
            .fetch(&target(format!("{}/biz", server.uri())), 1)
            .await;
        assert_eq!(
            outcome,
            FetchOutcome::Success {
                body: b"<html>ok</html>".to_vec()
            }
        );
    }

    #[tokio::test]
    async fn error_status_is_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let outcome = fetcher(2000)
            .fetch(&target(format!("{}/missing", server.uri())), 1)
            .await;
        assert_eq!(kind_of(&outcome), Some(FailureKind::HttpError));

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let outcome = fetcher(2000).fetch(&target(server.uri()), 1).await;
        assert_eq!(kind_of(&outcome), Some(FailureKind::HttpError));
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(1500)))
            .mount(&server)
            .await;

        let outcome = fetcher(100).fetch(&target(server.uri()), 1).await;
        assert_eq!(kind_of(&outcome), Some(FailureKind::TimedOut));
    }

    #[tokio::test]
    async fn malformed_url_is_invalid() {
        let outcome = fetcher(100).fetch(&target("htp//broken"), 1).await;
        assert_eq!(kind_of(&outcome), Some(FailureKind::InvalidUrl));

        let outcome = fetcher(100).fetch(&target(""), 1).await;
        assert_eq!(kind_of(&outcome), Some(FailureKind::InvalidUrl));
    }

    #[tokio::test]
    async fn refused_connection_is_other_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let outcome = fetcher(2000)
            .fetch(&target(format!("http://127.0.0.1:{}/", port)), 1)
            .await;
        assert_eq!(kind_of(&outcome), Some(FailureKind::OtherNetworkError));
    }
}
