//! Resilient client for the third-party quotes API.
//!
//! Every public operation is one logical call, layered as:
//!
//! ```text
//! CircuitBreaker::call        one outcome per logical call
//!   └─ retry loop             up to `retries` extra attempts
//!        └─ HTTP attempt      GET with per-attempt timeout
//! ```
//!
//! The retry loop as a whole is bounded by
//! [`UpstreamConfig::call_timeout`]; running past it fails the call with
//! [`FetchError::RequestTimeout`].
//!
//! # Retry strategy
//!
//! - Connection-level failure → retry
//! - HTTP 5xx → retry
//! - Timeout → fail immediately
//! - HTTP 4xx → fail immediately
//! - Body that does not decode as the expected shape → fail immediately
//!
//! Retry `n` (1-based) waits `backoff_base_ms * 2^n` plus up to 20% jitter.
//!
//! # Endpoints
//!
//! | Operation | Request | Payload |
//! |-----------|---------|---------|
//! | [`fetch_random_quote`](QuoteSource::fetch_random_quote) | `GET /random` | quote object, or array (first element used) |
//! | [`fetch_quotes_by_tag`](QuoteSource::fetch_quotes_by_tag) | `GET /quotes?tags=&limit=` | `{ "results": [...] }` |
//! | [`fetch_quotes_by_author`](QuoteSource::fetch_quotes_by_author) | `GET /quotes?author=&limit=` | `{ "results": [...] }` |
//! | [`search_quotes`](QuoteSource::search_quotes) | `GET /search/quotes?query=&limit=` | `{ "results": [...] }` |

use anyhow::Context;
use async_trait::async_trait;
use quote_relay_core::models::ExternalQuote;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::breaker::{BreakerSnapshot, BreakerState, CircuitBreaker};
use crate::config::{validate_breaker, validate_upstream, BreakerConfig, Config, UpstreamConfig};
use crate::error::FetchError;

/// Upper bound of the random jitter, as a fraction of the base delay.
const MAX_JITTER_FRACTION: f64 = 0.2;

/// A source of upstream quotes.
///
/// [`UpstreamClient`] is the production implementation; tests substitute
/// in-process fakes.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_random_quote(&self) -> Result<ExternalQuote, FetchError>;

    async fn fetch_quotes_by_tag(
        &self,
        tag: &str,
        limit: usize,
    ) -> Result<Vec<ExternalQuote>, FetchError>;

    async fn fetch_quotes_by_author(
        &self,
        author: &str,
        limit: usize,
    ) -> Result<Vec<ExternalQuote>, FetchError>;

    async fn search_quotes(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ExternalQuote>, FetchError>;

    /// Circuit state guarding this source. Sources without a breaker are
    /// always `Closed`.
    fn breaker_state(&self) -> BreakerState {
        BreakerState::Closed
    }
}

// ============ Retry policy ============

/// Exponential backoff schedule for the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self {
            retries: config.retries,
            base: Duration::from_millis(config.backoff_base_ms),
        }
    }

    /// Delay before retry `retry` (1-based) without jitter: `base * 2^retry`.
    pub fn base_delay(&self, retry: u32) -> Duration {
        self.base.saturating_mul(1u32 << retry.min(16))
    }

    /// Delay before retry `retry` with `jitter` in `[0, 1)` scaled to at
    /// most 20% of the base delay.
    pub fn delay_with_jitter(&self, retry: u32, jitter: f64) -> Duration {
        let base = self.base_delay(retry);
        base + base.mul_f64(jitter.clamp(0.0, 1.0) * MAX_JITTER_FRACTION)
    }

    fn delay(&self, retry: u32) -> Duration {
        self.delay_with_jitter(retry, rand::thread_rng().gen::<f64>())
    }
}

// ============ Wire shapes ============

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RandomPayload {
    Many(Vec<ExternalQuote>),
    One(ExternalQuote),
}

impl RandomPayload {
    fn into_first(self) -> Result<ExternalQuote, FetchError> {
        match self {
            RandomPayload::One(quote) => Ok(quote),
            RandomPayload::Many(quotes) => quotes
                .into_iter()
                .next()
                .ok_or_else(|| FetchError::invalid_response("empty quote array from /random")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResultsPage {
    results: Vec<ExternalQuote>,
}

// ============ Client ============

/// HTTP client for the quotes API with timeout, retry and circuit breaker.
#[derive(Debug)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    call_timeout: Duration,
    breaker: CircuitBreaker,
}

impl UpstreamClient {
    /// Build a client. Fails if either configuration is invalid.
    pub fn new(upstream: &UpstreamConfig, breaker: BreakerConfig) -> anyhow::Result<Self> {
        validate_upstream(upstream)?;
        validate_breaker(&breaker)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .timeout(upstream.timeout())
            .default_headers(headers)
            .user_agent(concat!("quote-relay/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(upstream.accept_invalid_certs)
            .build()
            .context("Failed to build upstream HTTP client")?;

        Ok(Self {
            http,
            base_url: upstream.base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::from_config(upstream),
            call_timeout: upstream.call_timeout(),
            breaker: CircuitBreaker::new(breaker),
        })
    }

    /// Build from a full configuration, honouring the environment rule
    /// for the breaker.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Self::new(&config.upstream, config.effective_breaker())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// One logical GET: breaker around the time-bounded retry loop.
    async fn get_json<T>(&self, path: &str, params: &[(&str, String)]) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
    {
        self.breaker
            .call(|| async {
                match tokio::time::timeout(self.call_timeout, self.get_with_retry(path, params))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(
                            path,
                            budget_ms = self.call_timeout.as_millis() as u64,
                            "Upstream call exceeded its time budget"
                        );
                        Err(FetchError::RequestTimeout)
                    }
                }
            })
            .await
    }

    async fn get_with_retry<T>(&self, path: &str, params: &[(&str, String)]) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
    {
        let mut retry = 0;
        loop {
            match self.attempt(path, params).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retry < self.retry.retries => {
                    retry += 1;
                    let delay = self.retry.delay(retry);
                    tracing::warn!(
                        path,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying upstream request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt<T>(&self, path: &str, params: &[(&str, String)]) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
    {
        let response = self.http.get(self.url(path)).query(params).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::UpstreamHttp {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| FetchError::invalid_response(e.to_string()))
    }

    async fn fetch_page(
        &self,
        op: &'static str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<ExternalQuote>, FetchError> {
        match self.get_json::<ResultsPage>(path, params).await {
            Ok(page) => {
                tracing::info!(op, count = page.results.len(), "Fetched quotes from upstream");
                Ok(page.results)
            }
            Err(e) => {
                log_failure(op, &e);
                Err(e)
            }
        }
    }
}

fn log_failure(op: &str, err: &FetchError) {
    match err {
        FetchError::UpstreamUnavailable => {
            tracing::warn!(op, "Upstream call rejected: circuit breaker open")
        }
        FetchError::Network { .. } => tracing::warn!(op, error = %err, "Upstream network error"),
        _ => tracing::error!(op, error = %err, "Upstream call failed"),
    }
}

#[async_trait]
impl QuoteSource for UpstreamClient {
    async fn fetch_random_quote(&self) -> Result<ExternalQuote, FetchError> {
        tracing::debug!("Fetching random quote from upstream");
        let result = match self.get_json::<RandomPayload>("/random", &[]).await {
            Ok(payload) => payload.into_first(),
            Err(e) => Err(e),
        };
        match &result {
            Ok(quote) => tracing::info!(id = %quote.id, "Fetched random quote from upstream"),
            Err(e) => log_failure("fetch_random_quote", e),
        }
        result
    }

    async fn fetch_quotes_by_tag(
        &self,
        tag: &str,
        limit: usize,
    ) -> Result<Vec<ExternalQuote>, FetchError> {
        tracing::debug!(tag, limit, "Fetching quotes by tag from upstream");
        let params = [("tags", tag.to_string()), ("limit", limit.to_string())];
        self.fetch_page("fetch_quotes_by_tag", "/quotes", &params)
            .await
    }

    async fn fetch_quotes_by_author(
        &self,
        author: &str,
        limit: usize,
    ) -> Result<Vec<ExternalQuote>, FetchError> {
        tracing::debug!(author, limit, "Fetching quotes by author from upstream");
        let params = [("author", author.to_string()), ("limit", limit.to_string())];
        self.fetch_page("fetch_quotes_by_author", "/quotes", &params)
            .await
    }

    async fn search_quotes(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ExternalQuote>, FetchError> {
        tracing::debug!(query, limit, "Searching upstream quotes");
        let params = [("query", query.to_string()), ("limit", limit.to_string())];
        self.fetch_page("search_quotes", "/search/quotes", &params)
            .await
    }

    fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }
}
