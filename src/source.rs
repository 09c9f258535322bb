//! Content feed client.
//!
//! The feed is a single JSON document:
//!
//! ```json
//! {
//!   "quotes": [
//!     {
//!       "id": "8f14e45f",
//!       "text": "It was the best of times, it was the worst of times.",
//!       "title": "A Tale of Two Cities",
//!       "author": "Charles Dickens",
//!       "image_url": "https://cdn.example.com/8f14e45f.jpg",
//!       "display": true,
//!       "archived": false
//!     }
//!   ]
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::Error;

/// Request timeout for feed and image downloads
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// How often a rate-limited request is retried
pub const MAX_RETRIES: u32 = 5;

/// Longest single wait between retries, whatever `Retry-After` says
const MAX_RETRY_WAIT: Duration = Duration::from_secs(120);

/// One quote as listed by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceQuote {
    /// Stable id
    pub id: String,
    /// Quote body
    pub text: String,
    /// Work title
    #[serde(default)]
    pub title: Option<String>,
    /// Author
    #[serde(default)]
    pub author: Option<String>,
    /// Background image location
    #[serde(default)]
    pub image_url: Option<String>,
    /// Display flag
    #[serde(default = "default_true")]
    pub display: bool,
    /// Archived quotes are never shown
    #[serde(default)]
    pub archived: bool,
}

fn default_true() -> bool {
    true
}

impl SourceQuote {
    /// Whether the quote should enter rotation.
    pub fn is_eligible(&self) -> bool {
        self.display && !self.archived
    }
}

#[derive(Debug, Deserialize)]
struct Feed {
    quotes: Vec<SourceQuote>,
}

/// Where quotes come from.
pub trait QuoteSource: Send + Sync {
    /// Fetch the full catalog.
    fn fetch_quotes(&self) -> impl Future<Output = Result<Vec<SourceQuote>, Error>> + Send;

    /// Download one background image.
    fn fetch_image(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, Error>> + Send;
}

/// JSON feed over HTTP.
///
/// # Example
///
/// ```rust,no_run
/// use ditto::{HttpSource, QuoteSource};
///
/// # async fn example() -> Result<(), ditto::Error> {
/// let source = HttpSource::new("https://quotes.example.com/feed.json")
///     .with_token("secret");
///
/// let quotes = source.fetch_quotes().await?;
/// println!("{} quotes", quotes.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpSource {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
    initial_backoff: Duration,
}

impl HttpSource {
    /// Create a source for the feed at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            url: url.into(),
            token: None,
            initial_backoff: Duration::from_secs(1),
        }
    }

    /// Send `Authorization: Bearer <token>` with feed requests.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set a custom HTTP client.
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// First wait after a rate-limited response when no `Retry-After` is
    /// given. Doubles on every retry.
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration) -> Self {
        self.initial_backoff = initial;
        self
    }

    /// Feed URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn get(&self, url: &str, authorized: bool) -> Result<reqwest::Response, Error> {
        let mut backoff = self.initial_backoff;
        for attempt in 0..=MAX_RETRIES {
            let mut request = self.http.get(url);
            if let (true, Some(token)) = (authorized, &self.token) {
                request = request.bearer_auth(token);
            }
            let response = request.send().await?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                if !response.status().is_success() {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    return Err(Error::Source(format!(
                        "{} returned {}: {}",
                        url,
                        status,
                        body.chars().take(200).collect::<String>()
                    )));
                }
                return Ok(response);
            }
            if attempt == MAX_RETRIES {
                break;
            }

            let wait = retry_after(response.headers()).unwrap_or(backoff).min(MAX_RETRY_WAIT);
            tracing::warn!(
                url,
                attempt = attempt + 1,
                wait_ms = wait.as_millis() as u64,
                "Rate limited by content source, retrying"
            );
            tokio::time::sleep(wait).await;
            backoff = backoff.saturating_mul(2);
        }
        Err(Error::Source(format!(
            "{} still rate limited after {} retries",
            url, MAX_RETRIES
        )))
    }
}

impl QuoteSource for HttpSource {
    async fn fetch_quotes(&self) -> Result<Vec<SourceQuote>, Error> {
        let response = self.get(&self.url, true).await?;
        let body = response.bytes().await?;
        let feed: Feed = serde_json::from_slice(&body)?;
        tracing::debug!(count = feed.quotes.len(), url = %self.url, "Fetched quote feed");
        Ok(feed.quotes)
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, Error> {
        let response = self.get(url, false).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// `Retry-After` in delta-seconds form.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}
