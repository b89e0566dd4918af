//! Shared types for the treasury gate.
//!
//! These types form the data model used across all modules.
//! They are kept free of component logic so that the oracle, chain,
//! treasury, and engine modules can depend on them without cycles.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, TxHash};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Price
// ---------------------------------------------------------------------------

/// Lowest ETH/USD price accepted from any source (exclusive).
pub const MIN_PLAUSIBLE_PRICE: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

/// Highest ETH/USD price accepted from any source (exclusive).
pub const MAX_PLAUSIBLE_PRICE: Decimal = Decimal::from_parts(100_000, 0, 0, false, 0);

/// The authoritative ETH/USD quote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceQuote {
    pub source: String,
    pub price: Decimal,
    /// `None` until the first successful refresh (seed value).
    pub observed_at: Option<DateTime<Utc>>,
}

impl PriceQuote {
    pub const SEED_SOURCE: &'static str = "seed";

    pub fn seed(price: Decimal) -> Self {
        Self {
            source: Self::SEED_SOURCE.to_string(),
            price,
            observed_at: None,
        }
    }

    pub fn is_seed(&self) -> bool {
        self.observed_at.is_none()
    }

    /// Age of the quote. `None` for the seed value.
    pub fn age(&self) -> Option<chrono::Duration> {
        self.observed_at.map(|t| Utc::now() - t)
    }
}

impl fmt::Display for PriceQuote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.2} ({})", self.price, self.source)
    }
}

/// Whether a price lies strictly inside the accepted range.
pub fn is_plausible_price(price: Decimal) -> bool {
    price > MIN_PLAUSIBLE_PRICE && price < MAX_PLAUSIBLE_PRICE
}

// ---------------------------------------------------------------------------
// Provider endpoints
// ---------------------------------------------------------------------------

/// One configured JSON-RPC endpoint.
///
/// `name` is derived from the host only, so URLs carrying API keys in their
/// path never leak into logs or API responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    pub url: String,
    pub name: String,
}

impl ProviderEndpoint {
    pub fn parse(url: &str) -> anyhow::Result<Self> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| anyhow::anyhow!("Invalid RPC endpoint URL: {e}"))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("RPC endpoint URL has no host"))?;
        Ok(Self {
            url: url.to_string(),
            name: short_host_name(host),
        })
    }
}

impl fmt::Display for ProviderEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// `eth-mainnet.g.alchemy.com` → `alchemy`, `localhost` → `localhost`.
fn short_host_name(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    match labels.len() {
        0 => host.to_string(),
        1 => labels[0].to_string(),
        // Raw IPv4 host: keep it whole.
        _ if labels.iter().all(|l| l.chars().all(|c| c.is_ascii_digit())) => host.to_string(),
        n => labels[n - 2].to_string(),
    }
}

// ---------------------------------------------------------------------------
// Balance cache
// ---------------------------------------------------------------------------

/// Where a cached balance was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceSource {
    Unset,
    Rpc,
    Etherscan,
}

/// Last known treasury balance, refreshed on a timer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedBalance {
    pub eth: Decimal,
    pub checked_at: Option<DateTime<Utc>>,
    pub via: BalanceSource,
}

impl CachedBalance {
    pub fn unset() -> Self {
        Self {
            eth: Decimal::ZERO,
            checked_at: None,
            via: BalanceSource::Unset,
        }
    }

    /// At least one refresh has completed.
    pub fn is_set(&self) -> bool {
        self.checked_at.is_some()
    }

    pub fn age(&self) -> Option<chrono::Duration> {
        self.checked_at.map(|t| Utc::now() - t)
    }
}

// ---------------------------------------------------------------------------
// Accrual engine
// ---------------------------------------------------------------------------

/// Tick profile for the accrual engine. Profiles differ only in tick
/// interval and per-tick batch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineProfile {
    Mega,
    Ultra,
    Standard,
}

impl EngineProfile {
    /// Nominal trades per second advertised for this profile.
    pub fn nominal_tps(&self) -> u64 {
        match self {
            EngineProfile::Mega => 1_000_000,
            EngineProfile::Ultra => 1_000,
            EngineProfile::Standard => 100,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        match self {
            EngineProfile::Mega | EngineProfile::Ultra => Duration::from_millis(1),
            EngineProfile::Standard => Duration::from_millis(10),
        }
    }

    pub fn batch_size(&self) -> u64 {
        match self {
            EngineProfile::Mega => 1_000,
            EngineProfile::Ultra | EngineProfile::Standard => 1,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EngineProfile::Mega => "MEGA_1M_TPS",
            EngineProfile::Ultra => "ULTRA_1000_TPS",
            EngineProfile::Standard => "STANDARD_100_TPS",
        }
    }
}

impl fmt::Display for EngineProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for EngineProfile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mega" | "mega_1m_tps" => Ok(EngineProfile::Mega),
            "ultra" | "ultra_1000_tps" => Ok(EngineProfile::Ultra),
            "standard" | "standard_100_tps" => Ok(EngineProfile::Standard),
            _ => Err(anyhow::anyhow!("Unknown engine profile: {s}")),
        }
    }
}

/// Accrual engine state, re-evaluated every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// No balance refresh yet, or paused.
    Waiting,
    /// Refreshed, but the balance is below the funding floor.
    Starved,
    /// Funded; counters advance every tick.
    Active,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Waiting => write!(f, "WAITING"),
            EngineState::Starved => write!(f, "STARVED"),
            EngineState::Active => write!(f, "ACTIVE"),
        }
    }
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

/// How the amount of a transfer is expressed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountSpec {
    /// Absolute ETH.
    Eth(Decimal),
    /// Percentage (0, 100] of the fresh on-chain balance.
    Percentage(Decimal),
    /// USD, converted at the current oracle price.
    Usd(Decimal),
}

impl fmt::Display for AmountSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmountSpec::Eth(v) => write!(f, "{v} ETH"),
            AmountSpec::Percentage(v) => write!(f, "{v}% of balance"),
            AmountSpec::Usd(v) => write!(f, "${v}"),
        }
    }
}

/// A validated-shape request to move value out of the treasury.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Caller-supplied destination. Falls back to the configured default.
    pub destination: Option<String>,
    pub amount: AmountSpec,
}

/// Produced only after on-chain confirmation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    /// Gas units consumed.
    pub gas_used: u128,
    /// `gas_used × effective_gas_price`, in ETH.
    pub gas_cost_eth: Decimal,
    pub amount_eth: Decimal,
    pub amount_usd: Decimal,
    pub eth_price: Decimal,
    pub destination: Address,
    pub confirmed: bool,
}

impl fmt::Display for TransferReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.6} ETH (${:.2}) → {} in block #{} [{}]",
            self.amount_eth, self.amount_usd, self.destination, self.block_number, self.tx_hash,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Category of an on-chain or RPC failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFaultKind {
    /// The node rejected or failed the call.
    Rpc,
    /// The transaction was mined with a failed status.
    Reverted,
    /// A bounded wait elapsed.
    Timeout,
    /// The transaction disappeared before confirmation.
    Dropped,
    /// A response could not be interpreted.
    Decode,
}

/// Failure reported by a chain client, with provider diagnostics passed
/// through verbatim when available.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ChainFault {
    pub kind: ChainFaultKind,
    pub message: String,
    pub code: Option<i64>,
    pub reason: Option<String>,
    pub tx_hash: Option<TxHash>,
}

impl ChainFault {
    pub fn new(kind: ChainFaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            reason: None,
            tx_hash: None,
        }
    }

    pub fn rpc(message: impl Into<String>) -> Self {
        Self::new(ChainFaultKind::Rpc, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ChainFaultKind::Timeout, message)
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_tx_hash(mut self, tx_hash: TxHash) -> Self {
        self.tx_hash = Some(tx_hash);
        self
    }
}

/// Domain-specific error types for treasury operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TreasuryError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("All {attempted} RPC endpoints failed (last error: {last_error})")]
    Connectivity { attempted: usize, last_error: String },

    #[error(
        "Insufficient balance (need amount + gas): need {total_needed} ETH, have {available} ETH"
    )]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
        gas_estimate: Decimal,
        total_needed: Decimal,
        max_withdrawable: Decimal,
    },

    #[error("Insufficient backend balance: need {required} ETH, have {current} ETH")]
    BelowFundingFloor { required: Decimal, current: Decimal },

    #[error("Backend is paused")]
    Paused,

    #[error("Chain error: {0}")]
    Chain(#[from] ChainFault),
}

impl TreasuryError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            TreasuryError::Validation(_) => "validation",
            TreasuryError::Connectivity { .. } => "connectivity",
            TreasuryError::InsufficientFunds { .. } => "insufficient_funds",
            TreasuryError::BelowFundingFloor { .. } => "below_funding_floor",
            TreasuryError::Paused => "paused",
            TreasuryError::Chain(_) => "chain",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        TreasuryError::Validation(message.into())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
