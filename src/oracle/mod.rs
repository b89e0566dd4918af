//! ETH/USD price oracle.
//!
//! Sources are tried strictly in priority order; the first plausible price
//! wins and nothing is averaged. A failed refresh keeps the previous quote,
//! so `current_price()` always answers (with the seed value until the first
//! success).

pub mod sources;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::OracleConfig;
use crate::types::{is_plausible_price, PriceQuote};

/// One external ETH/USD feed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the current price. Range checks are the oracle's job.
    async fn fetch_price(&self) -> Result<Decimal>;
}

pub struct PriceOracle {
    sources: Vec<Arc<dyn PriceSource>>,
    attempts_per_source: u32,
    request_timeout: Duration,
    stale_after: chrono::Duration,
    quote: RwLock<PriceQuote>,
}

impl PriceOracle {
    pub fn new(sources: Vec<Arc<dyn PriceSource>>, config: &OracleConfig) -> Self {
        Self {
            sources,
            attempts_per_source: config.attempts_per_source.max(1),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            stale_after: chrono::Duration::seconds(config.stale_warning_secs as i64),
            quote: RwLock::new(PriceQuote::seed(config.seed_price_usd)),
        }
    }

    /// Poll sources in order until one yields a plausible price.
    ///
    /// Returns `true` when the quote was updated. Never fails: when every
    /// source is exhausted the previous quote is kept.
    pub async fn refresh(&self) -> bool {
        for source in &self.sources {
            for attempt in 1..=self.attempts_per_source {
                match self.fetch_bounded(source.as_ref()).await {
                    Ok(price) if is_plausible_price(price) => {
                        let quote = PriceQuote {
                            source: source.name().to_string(),
                            price,
                            observed_at: Some(Utc::now()),
                        };
                        info!(price = %price.round_dp(2), source = source.name(), "ETH price updated");
                        *self.quote.write().await = quote;
                        return true;
                    }
                    Ok(price) => {
                        warn!(
                            source = source.name(),
                            price = %price,
                            attempt,
                            "Implausible ETH price rejected"
                        );
                    }
                    Err(e) => {
                        debug!(source = source.name(), attempt, error = %e, "Price fetch failed");
                    }
                }
            }
        }

        let quote = self.current_quote().await;
        match quote.age() {
            Some(age) if age > self.stale_after => {
                warn!(
                    price = %quote.price.round_dp(2),
                    age_secs = age.num_seconds(),
                    "Price sources unavailable, using stale quote"
                );
            }
            None => {
                warn!(price = %quote.price, "Price sources unavailable, still on seed price");
            }
            Some(_) => debug!("Price sources unavailable, keeping recent quote"),
        }
        false
    }

    async fn fetch_bounded(&self, source: &dyn PriceSource) -> Result<Decimal> {
        match tokio::time::timeout(self.request_timeout, source.fetch_price()).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!(
                "{} timed out after {}s",
                source.name(),
                self.request_timeout.as_secs()
            ),
        }
    }

    pub async fn current_price(&self) -> Decimal {
        self.quote.read().await.price
    }

    pub async fn current_quote(&self) -> PriceQuote {
        self.quote.read().await.clone()
    }

    /// Age of the current quote; `None` while on the seed value.
    pub async fn staleness(&self) -> Option<chrono::Duration> {
        self.quote.read().await.age()
    }

    /// Whether the quote is older than the staleness threshold (or never
    /// refreshed).
    pub async fn is_stale(&self) -> bool {
        match self.staleness().await {
            Some(age) => age > self.stale_after,
            None => true,
        }
    }
}
