//! Public ETH/USD price endpoints.
//!
//! Four unauthenticated exchange APIs, each with its own response shape.
//! Prices arrive as strings (Binance, Coinbase, Kraken) or JSON numbers
//! (CoinGecko); both are parsed straight into `Decimal` without passing
//! through `f64`.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use super::PriceSource;

const USER_AGENT: &str = concat!("treasury-gate/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

/// `GET api/v3/ticker/price?symbol=ETHUSDT` → `{"symbol":"ETHUSDT","price":"3456.78000000"}`
#[derive(Debug, Deserialize)]
struct BinanceTicker {
    price: String,
}

/// `GET api/v3/simple/price?ids=ethereum&vs_currencies=usd` → `{"ethereum":{"usd":3456.78}}`
#[derive(Debug, Deserialize)]
struct CoinGeckoPrice {
    ethereum: CoinGeckoUsd,
}

#[derive(Debug, Deserialize)]
struct CoinGeckoUsd {
    usd: serde_json::Number,
}

/// `GET v2/prices/ETH-USD/spot` → `{"data":{"amount":"3456.78","base":"ETH","currency":"USD"}}`
#[derive(Debug, Deserialize)]
struct CoinbaseSpot {
    data: CoinbaseAmount,
}

#[derive(Debug, Deserialize)]
struct CoinbaseAmount {
    amount: String,
}

/// `GET 0/public/Ticker?pair=ETHUSD` → `{"error":[],"result":{"XETHZUSD":{"c":["3456.78","0.1"],...}}}`
#[derive(Debug, Deserialize)]
struct KrakenTicker {
    #[serde(default)]
    error: Vec<String>,
    result: Option<KrakenResult>,
}

#[derive(Debug, Deserialize)]
struct KrakenResult {
    #[serde(rename = "XETHZUSD")]
    eth_usd: KrakenPair,
}

#[derive(Debug, Deserialize)]
struct KrakenPair {
    /// Last trade closed: `[price, lot volume]`.
    c: Vec<String>,
}

// ---------------------------------------------------------------------------
// Exchanges
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    Binance,
    CoinGecko,
    Coinbase,
    Kraken,
}

impl Exchange {
    pub fn name(&self) -> &'static str {
        match self {
            Exchange::Binance => "binance",
            Exchange::CoinGecko => "coingecko",
            Exchange::Coinbase => "coinbase",
            Exchange::Kraken => "kraken",
        }
    }

    pub fn url(&self) -> &'static str {
        match self {
            Exchange::Binance => "https://api.binance.com/api/v3/ticker/price?symbol=ETHUSDT",
            Exchange::CoinGecko => {
                "https://api.coingecko.com/api/v3/simple/price?ids=ethereum&vs_currencies=usd"
            }
            Exchange::Coinbase => "https://api.coinbase.com/v2/prices/ETH-USD/spot",
            Exchange::Kraken => "https://api.kraken.com/0/public/Ticker?pair=ETHUSD",
        }
    }

    /// Extract the ETH/USD price from a response body.
    pub fn parse(&self, body: &str) -> Result<Decimal> {
        let raw = match self {
            Exchange::Binance => serde_json::from_str::<BinanceTicker>(body)?.price,
            Exchange::CoinGecko => serde_json::from_str::<CoinGeckoPrice>(body)?
                .ethereum
                .usd
                .to_string(),
            Exchange::Coinbase => serde_json::from_str::<CoinbaseSpot>(body)?.data.amount,
            Exchange::Kraken => {
                let ticker: KrakenTicker = serde_json::from_str(body)?;
                if !ticker.error.is_empty() {
                    anyhow::bail!("Kraken error: {}", ticker.error.join(", "));
                }
                ticker
                    .result
                    .and_then(|r| r.eth_usd.c.into_iter().next())
                    .context("Kraken response has no last-trade price")?
            }
        };
        Decimal::from_str(raw.trim())
            .with_context(|| format!("Unparseable {} price: {raw}", self.name()))
    }
}

impl FromStr for Exchange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "binance" => Ok(Exchange::Binance),
            "coingecko" => Ok(Exchange::CoinGecko),
            "coinbase" => Ok(Exchange::Coinbase),
            "kraken" => Ok(Exchange::Kraken),
            other => anyhow::bail!("Unknown price source: {other}"),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP source
// ---------------------------------------------------------------------------

/// A `PriceSource` backed by one exchange's public HTTP API.
pub struct ExchangeSource {
    exchange: Exchange,
    http: Client,
}

impl ExchangeSource {
    pub fn new(exchange: Exchange, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client for price source")?;
        Ok(Self { exchange, http })
    }

    /// Build sources for the configured names, in order.
    pub fn from_names(names: &[String], timeout: Duration) -> Result<Vec<Self>> {
        names
            .iter()
            .map(|name| Self::new(name.parse()?, timeout))
            .collect()
    }
}

#[async_trait]
impl PriceSource for ExchangeSource {
    fn name(&self) -> &str {
        self.exchange.name()
    }

    async fn fetch_price(&self) -> Result<Decimal> {
        let url = self.exchange.url();
        debug!(source = self.exchange.name(), "Fetching ETH price");

        let resp = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("{} request failed", self.exchange.name()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("{} API error {status}", self.exchange.name());
        }

        let body = resp
            .text()
            .await
            .with_context(|| format!("Failed to read {} response", self.exchange.name()))?;
        self.exchange.parse(&body)
    }
}
