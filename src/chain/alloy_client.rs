//! alloy-backed `ChainClient` over HTTP JSON-RPC.
//!
//! Every client carries an `EthereumWallet` built from the treasury key, so
//! `send_transfer` signs locally and fills nonce and chain id from the node.

use std::str::FromStr;
use std::sync::Arc;

use alloy::network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::TransportError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use super::{ChainClient, ChainReceipt, Connector, TransferTx};
use crate::types::{ChainFault, ChainFaultKind, ProviderEndpoint};

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Builds signing HTTP clients for the treasury key.
pub struct AlloyConnector {
    signer: PrivateKeySigner,
}

impl AlloyConnector {
    /// Parse the treasury key. The key never appears in errors or logs.
    pub fn from_secret(private_key: &SecretString) -> Result<Self> {
        let signer = PrivateKeySigner::from_str(private_key.expose_secret().trim())
            .ok()
            .context("Treasury private key is not a valid secp256k1 key")?;
        Ok(Self { signer })
    }
}

impl Connector for AlloyConnector {
    fn signer_address(&self) -> Address {
        self.signer.address()
    }

    fn connect(&self, endpoint: &ProviderEndpoint) -> Result<Arc<dyn ChainClient>, ChainFault> {
        let url: reqwest::Url = endpoint.url.parse().map_err(|_| {
            ChainFault::new(
                ChainFaultKind::Decode,
                format!("Invalid URL for RPC endpoint {}", endpoint.name),
            )
        })?;

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(self.signer.clone()))
            .connect_http(url)
            .erased();

        debug!(rpc = %endpoint.name, "Built RPC client");
        Ok(Arc::new(AlloyClient { provider }))
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct AlloyClient {
    provider: DynProvider,
}

#[async_trait]
impl ChainClient for AlloyClient {
    async fn block_number(&self) -> Result<u64, ChainFault> {
        self.provider.get_block_number().await.map_err(rpc_fault)
    }

    async fn balance(&self, address: Address) -> Result<U256, ChainFault> {
        self.provider.get_balance(address).await.map_err(rpc_fault)
    }

    async fn gas_price(&self) -> Result<u128, ChainFault> {
        self.provider.get_gas_price().await.map_err(rpc_fault)
    }

    async fn send_transfer(&self, tx: TransferTx) -> Result<TxHash, ChainFault> {
        let request = TransactionRequest::default()
            .with_to(tx.to)
            .with_value(tx.value)
            .with_gas_limit(tx.gas_limit)
            .with_max_fee_per_gas(tx.max_fee_per_gas)
            .with_max_priority_fee_per_gas(tx.max_priority_fee_per_gas);

        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(rpc_fault)?;
        Ok(*pending.tx_hash())
    }

    async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<ChainReceipt>, ChainFault> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| rpc_fault(e).with_tx_hash(tx_hash))?;

        let Some(receipt) = receipt else {
            return Ok(None);
        };
        // Some nodes return receipts for pending blocks without a number.
        let Some(block_number) = ReceiptResponse::block_number(&receipt) else {
            return Ok(None);
        };

        Ok(Some(ChainReceipt {
            tx_hash: ReceiptResponse::transaction_hash(&receipt),
            block_number,
            gas_used: u128::from(ReceiptResponse::gas_used(&receipt)),
            effective_gas_price: ReceiptResponse::effective_gas_price(&receipt),
            success: ReceiptResponse::status(&receipt),
        }))
    }

    async fn transaction_known(&self, tx_hash: TxHash) -> Result<bool, ChainFault> {
        let tx = self
            .provider
            .get_transaction_by_hash(tx_hash)
            .await
            .map_err(|e| rpc_fault(e).with_tx_hash(tx_hash))?;
        Ok(tx.is_some())
    }
}

/// Map a transport error to a `ChainFault`, keeping the JSON-RPC error code
/// and message when the node returned one.
fn rpc_fault(err: TransportError) -> ChainFault {
    match err.as_error_resp() {
        Some(payload) => {
            let message = payload.message.to_string();
            ChainFault::rpc(message.clone())
                .with_code(payload.code)
                .with_reason(message)
        }
        None => ChainFault::rpc(err.to_string()),
    }
}
