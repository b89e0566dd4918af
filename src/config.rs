//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the treasury key, destination addresses, RPC URLs carrying
//! API keys) are referenced by env-var name in the config and resolved at
//! runtime via `std::env::var`. Nothing sensitive is compiled in.

use std::fs;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;

use crate::types::{
    is_plausible_price, EngineProfile, ProviderEndpoint, MAX_PLAUSIBLE_PRICE, MIN_PLAUSIBLE_PRICE,
};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub treasury: TreasuryConfig,
    pub oracle: OracleConfig,
    pub balance: BalanceConfig,
    pub accrual: AccrualConfig,
    pub disbursement: DisbursementConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TreasuryConfig {
    pub private_key_env: String,
    pub fee_recipient_env: Option<String>,
    pub default_destination_env: Option<String>,
    pub etherscan_api_key_env: Option<String>,
    /// When set and present in the environment, replaces `rpc_endpoints`.
    pub rpc_endpoints_env: Option<String>,
    pub rpc_endpoints: Vec<String>,
    pub rpc_timeout_secs: u64,
}

impl Default for TreasuryConfig {
    fn default() -> Self {
        Self {
            private_key_env: "TREASURY_PRIVATE_KEY".to_string(),
            fee_recipient_env: Some("FEE_RECIPIENT".to_string()),
            default_destination_env: Some("BACKEND_WALLET".to_string()),
            etherscan_api_key_env: Some("ETHERSCAN_API_KEY".to_string()),
            rpc_endpoints_env: Some("TREASURY_RPC_ENDPOINTS".to_string()),
            rpc_endpoints: Vec::new(),
            rpc_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OracleConfig {
    pub refresh_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub attempts_per_source: u32,
    pub seed_price_usd: Decimal,
    pub stale_warning_secs: u64,
    pub sources: Vec<String>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 30,
            request_timeout_secs: 5,
            attempts_per_source: 2,
            seed_price_usd: dec!(3450),
            stale_warning_secs: 300,
            sources: vec![
                "binance".to_string(),
                "coingecko".to_string(),
                "coinbase".to_string(),
                "kraken".to_string(),
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BalanceConfig {
    pub refresh_interval_secs: u64,
    pub initial_delay_secs: u64,
    /// Minimum ETH the treasury must hold before accrual or `/execute` runs.
    pub funding_floor_eth: Decimal,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 15,
            initial_delay_secs: 2,
            funding_floor_eth: dec!(0.01),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AccrualConfig {
    pub profile: EngineProfile,
    pub start_delay_secs: u64,
    pub profit_per_trade: Decimal,
    pub merge_interval_secs: u64,
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            profile: EngineProfile::Mega,
            start_delay_secs: 3,
            profit_per_trade: dec!(0.00001),
            merge_interval_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DisbursementConfig {
    pub gas_limit: u64,
    pub gas_safety_multiplier: u64,
    pub max_fee_multiplier: u64,
    pub priority_fee_gwei: u64,
    pub withdraw_buffer_eth: Decimal,
    pub confirmations: u64,
    pub confirmation_timeout_secs: u64,
    /// Run at most one disbursement at a time (avoids nonce races).
    pub serialize: bool,
}

impl Default for DisbursementConfig {
    fn default() -> Self {
        Self {
            gas_limit: 21_000,
            gas_safety_multiplier: 2,
            max_fee_multiplier: 2,
            priority_fee_gwei: 2,
            withdraw_buffer_eth: dec!(0.0005),
            confirmations: 1,
            confirmation_timeout_secs: 180,
            serialize: true,
        }
    }
}

impl DisbursementConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

/// Values resolved from the environment at startup.
pub struct TreasurySecrets {
    pub private_key: SecretString,
    pub fee_recipient: Option<Address>,
    pub default_destination: Option<Address>,
    pub etherscan_api_key: Option<SecretString>,
    pub endpoints: Vec<ProviderEndpoint>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let intervals = [
            ("oracle.refresh_interval_secs", self.oracle.refresh_interval_secs),
            ("oracle.request_timeout_secs", self.oracle.request_timeout_secs),
            ("treasury.rpc_timeout_secs", self.treasury.rpc_timeout_secs),
            ("balance.refresh_interval_secs", self.balance.refresh_interval_secs),
            ("accrual.merge_interval_secs", self.accrual.merge_interval_secs),
            ("disbursement.confirmation_timeout_secs", self.disbursement.confirmation_timeout_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, secs)| *secs == 0) {
            anyhow::bail!("{name} must be at least 1 second");
        }
        if self.oracle.attempts_per_source == 0 {
            anyhow::bail!("oracle.attempts_per_source must be at least 1");
        }
        if !is_plausible_price(self.oracle.seed_price_usd) {
            anyhow::bail!(
                "oracle.seed_price_usd must lie between {MIN_PLAUSIBLE_PRICE} and {MAX_PLAUSIBLE_PRICE}"
            );
        }
        if self.disbursement.gas_limit == 0 {
            anyhow::bail!("disbursement.gas_limit must be positive");
        }
        if self.disbursement.confirmations == 0 {
            anyhow::bail!("disbursement.confirmations must be at least 1");
        }
        if self.disbursement.gas_safety_multiplier == 0 {
            anyhow::bail!("disbursement.gas_safety_multiplier must be at least 1");
        }
        if self.disbursement.max_fee_multiplier == 0 {
            anyhow::bail!("disbursement.max_fee_multiplier must be at least 1");
        }
        if self.balance.funding_floor_eth <= Decimal::ZERO {
            anyhow::bail!("balance.funding_floor_eth must be positive");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve every treasury secret and address from the environment.
    ///
    /// The private key is mandatory; addresses are optional but must parse
    /// when present. At least one RPC endpoint must remain after resolution.
    pub fn resolve_treasury(&self) -> Result<TreasurySecrets> {
        let cfg = &self.treasury;

        let private_key = Self::resolve_env(&cfg.private_key_env)
            .map(SecretString::new)
            .context("Treasury private key is required")?;

        let fee_recipient = optional_address(cfg.fee_recipient_env.as_deref())?;
        let default_destination = optional_address(cfg.default_destination_env.as_deref())?;

        let etherscan_api_key = cfg
            .etherscan_api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::new);

        let env_endpoints = cfg
            .rpc_endpoints_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok());
        let urls: Vec<String> = match env_endpoints {
            Some(list) => split_endpoint_list(&list),
            None => cfg.rpc_endpoints.clone(),
        };

        let endpoints = urls
            .iter()
            .map(|url| ProviderEndpoint::parse(url))
            .collect::<Result<Vec<_>>>()?;
        if endpoints.is_empty() {
            anyhow::bail!("No RPC endpoints configured");
        }

        Ok(TreasurySecrets {
            private_key,
            fee_recipient,
            default_destination,
            etherscan_api_key,
            endpoints,
        })
    }
}

fn optional_address(env_name: Option<&str>) -> Result<Option<Address>> {
    let Some(name) = env_name else {
        return Ok(None);
    };
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Address::from_str(value.trim())
            .map(Some)
            .with_context(|| format!("{name} is not a valid address")),
        _ => Ok(None),
    }
}

fn split_endpoint_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
