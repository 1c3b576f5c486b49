//! Odds source adapter.
//!
//! The provider protocol itself is an external concern; the pipeline only
//! depends on the `OddsSource` trait and treats any non-success status as
//! a per-sport failure. A retrying wrapper adds capped exponential backoff
//! with jitter for transient provider errors.

use crate::types::{RawEvent, Sport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Success,
    Error,
}

/// Result of one fetch call, per the source contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub status: FetchStatus,
    pub events: Vec<RawEvent>,
    pub total_events: usize,
    pub fetch_time: DateTime<Utc>,
}

impl FetchOutcome {
    pub fn success(events: Vec<RawEvent>) -> Self {
        let total_events = events.len();
        Self {
            status: FetchStatus::Success,
            events,
            total_events,
            fetch_time: Utc::now(),
        }
    }

    pub fn error() -> Self {
        Self {
            status: FetchStatus::Error,
            events: Vec::new(),
            total_events: 0,
            fetch_time: Utc::now(),
        }
    }
}

/// Pluggable odds source.
#[async_trait]
pub trait OddsSource: Send + Sync {
    async fn fetch(&self, sports: &[Sport]) -> Result<FetchOutcome>;

    /// Source name for logging and the offer `source` column.
    fn source_name(&self) -> &str;
}

/// REST adapter for an odds-API style provider. Returns raw events; all
/// odds stay in American string form for the EV processor to parse.
pub struct HttpOddsSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpOddsSource {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .context("building odds http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl OddsSource for HttpOddsSource {
    async fn fetch(&self, sports: &[Sport]) -> Result<FetchOutcome> {
        let mut events = Vec::new();
        for sport in sports {
            let url = format!("{}/sports/{}/odds", self.base_url, sport.api_key());
            let response = self
                .client
                .get(&url)
                .query(&[
                    ("apiKey", self.api_key.as_str()),
                    ("oddsFormat", "american"),
                    ("regions", "us"),
                ])
                .send()
                .await
                .with_context(|| format!("odds request for {sport} failed"))?;

            if !response.status().is_success() {
                warn!(%sport, status = %response.status(), "odds provider returned non-success");
                return Ok(FetchOutcome::error());
            }

            let mut sport_events: Vec<RawEvent> = response
                .json()
                .await
                .with_context(|| format!("decoding odds payload for {sport}"))?;
            events.append(&mut sport_events);
        }
        Ok(FetchOutcome::success(events))
    }

    fn source_name(&self) -> &str {
        "odds_api"
    }
}

/// Wraps any source with capped exponential backoff plus jitter.
pub struct RetryingSource {
    inner: Arc<dyn OddsSource>,
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl RetryingSource {
    pub fn new(inner: Arc<dyn OddsSource>, max_attempts: u32) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(15),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(2_u32.saturating_pow(attempt - 1))
            .min(self.max_backoff);
        let jitter_ms = rand::thread_rng().gen_range(0..=exp.as_millis() as u64 / 4);
        exp + Duration::from_millis(jitter_ms)
    }
}

#[async_trait]
impl OddsSource for RetryingSource {
    async fn fetch(&self, sports: &[Sport]) -> Result<FetchOutcome> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.fetch(sports).await {
                Ok(outcome) if outcome.status == FetchStatus::Success => return Ok(outcome),
                Ok(outcome) if attempt >= self.max_attempts => return Ok(outcome),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Ok(_) => {
                    warn!(attempt, max = self.max_attempts, "source returned error status, retrying");
                }
                Err(e) => {
                    warn!(attempt, max = self.max_attempts, error = %e, "source fetch failed, retrying");
                }
            }
            tokio::time::sleep(self.backoff(attempt)).await;
        }
    }

    fn source_name(&self) -> &str {
        self.inner.source_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySource {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl OddsSource for FlakySource {
        async fn fetch(&self, _sports: &[Sport]) -> Result<FetchOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Ok(FetchOutcome::error())
            } else {
                Ok(FetchOutcome::success(Vec::new()))
            }
        }

        fn source_name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_retrying_source_recovers() {
        let flaky = Arc::new(FlakySource {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
        });
        let source = RetryingSource {
            inner: flaky.clone(),
            max_attempts: 5,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        };

        let outcome = source.fetch(&[Sport::NFL]).await.unwrap();
        assert_eq!(outcome.status, FetchStatus::Success);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retrying_source_gives_up() {
        let flaky = Arc::new(FlakySource {
            failures_before_success: 10,
            calls: AtomicU32::new(0),
        });
        let source = RetryingSource {
            inner: flaky,
            max_attempts: 2,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        };

        let outcome = source.fetch(&[Sport::NFL]).await.unwrap();
        assert_eq!(outcome.status, FetchStatus::Error);
    }

    #[test]
    fn test_fetch_outcome_counts_events() {
        let outcome = FetchOutcome::success(Vec::new());
        assert_eq!(outcome.total_events, 0);
        assert_eq!(outcome.status, FetchStatus::Success);
    }
}
