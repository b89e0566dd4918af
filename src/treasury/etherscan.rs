//! Etherscan balance lookup, used when an RPC balance read fails.
//!
//! API docs: https://docs.etherscan.io/api-endpoints/accounts
//! Base URL: https://api.etherscan.io/v2/api (chainid=1 for mainnet)
//! Auth: `apikey` query parameter.

use std::time::Duration;

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::chain::units::wei_to_eth;

const BASE_URL: &str = "https://api.etherscan.io/v2/api";
const MAINNET_CHAIN_ID: &str = "1";

/// Secondary source for the treasury balance.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BalanceFallback: Send + Sync {
    /// Balance of `address` in ETH.
    async fn balance_of(&self, address: Address) -> Result<Decimal>;
}

/// `{"status":"1","message":"OK","result":"40891626854930000000000"}`
#[derive(Debug, Deserialize)]
struct EtherscanResponse {
    status: String,
    #[serde(default)]
    message: String,
    result: String,
}

impl EtherscanResponse {
    fn into_eth(self) -> Result<Decimal> {
        if self.status != "1" {
            // On failure `result` carries the human-readable reason.
            anyhow::bail!("Etherscan error: {} ({})", self.message, self.result);
        }
        let wei: U256 = self
            .result
            .trim()
            .parse()
            .with_context(|| format!("Etherscan returned a non-numeric balance: {}", self.result))?;
        Ok(wei_to_eth(wei))
    }
}

pub struct EtherscanBalance {
    http: Client,
    api_key: SecretString,
}

impl EtherscanBalance {
    pub fn new(api_key: SecretString, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("treasury-gate/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client for Etherscan")?;
        Ok(Self { http, api_key })
    }
}

#[async_trait]
impl BalanceFallback for EtherscanBalance {
    async fn balance_of(&self, address: Address) -> Result<Decimal> {
        debug!(address = %address, "Fetching balance from Etherscan");

        let address = address.to_string();
        let resp = self
            .http
            .get(BASE_URL)
            .query(&[
                ("chainid", MAINNET_CHAIN_ID),
                ("module", "account"),
                ("action", "balance"),
                ("address", address.as_str()),
                ("tag", "latest"),
                ("apikey", self.api_key.expose_secret().as_str()),
            ])
            .send()
            .await
            // Strip the URL so the API key never reaches logs.
            .map_err(|e| e.without_url())
            .context("Etherscan request failed")?;

        if !resp.status().is_success() {
            anyhow::bail!("Etherscan API error {}", resp.status());
        }

        let body: EtherscanResponse = resp
            .json()
            .await
            .map_err(|e| e.without_url())
            .context("Failed to parse Etherscan balance response")?;
        body.into_eth()
    }
}
