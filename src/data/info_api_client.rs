use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.darwinex.com/darwininfo/2.1";

/// Source of raw `(timestamp_ms, quote)` pairs for a DARWIN.
pub trait QuoteFetcher: Send + Sync {
    fn get_quotes(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Future<Output = Result<Vec<(i64, f64)>>> + Send;
}

/// Midnight UTC of `date`, in epoch milliseconds.
pub fn date_to_epoch_ms(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Exponential backoff applied to rate-limited (429) and 5xx responses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 5,
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::builder()
            .retry_bounds(self.min_backoff, self.max_backoff.max(self.min_backoff))
            .build_with_max_retries(self.max_retries)
    }
}

fn build_client(retry: RetryPolicy) -> ClientWithMiddleware {
    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| Client::new());

    ClientBuilder::new(client)
        .with(RetryTransientMiddleware::new_with_policy(retry.backoff()))
        .build()
}

/// Darwinex Info API client authenticated with a Bearer token.
#[derive(Clone)]
pub struct InfoApiClient {
    client: ClientWithMiddleware,
    api_key: String,
    base_url: String,
}

impl InfoApiClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        InfoApiClient {
            client: build_client(RetryPolicy::default()),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.client = build_client(retry);
        self
    }

    pub fn quotes_url(&self, symbol: &str) -> String {
        format!("{}/products/{}/history/quotes", self.base_url, symbol)
    }
}

impl QuoteFetcher for InfoApiClient {
    async fn get_quotes(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(i64, f64)>> {
        let url = format!(
            "{}?start={}&end={}",
            self.quotes_url(symbol),
            date_to_epoch_ms(start),
            date_to_epoch_ms(end)
        );
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .with_context(|| format!("Request for {} quotes failed", symbol))?;

        // transient statuses are still failing once the retries are spent
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!(
                "Info API returned {} for {} quotes",
                status,
                symbol
            ));
        }
        response
            .json::<Vec<(i64, f64)>>()
            .await
            .with_context(|| format!("Unexpected quotes payload for {}", symbol))
    }
}
