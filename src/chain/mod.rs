//! Chain access.
//!
//! Defines the `ChainClient` trait (one JSON-RPC endpoint, bound to the
//! treasury signer) and the `Connector` that builds clients per endpoint.
//! The alloy-backed implementations live in `alloy_client`; endpoint
//! failover lives in `selector`.

pub mod alloy_client;
pub mod selector;
pub mod units;

use std::sync::Arc;

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;

use crate::types::{ChainFault, ProviderEndpoint};

/// A fully-specified EIP-1559 value transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTx {
    pub to: Address,
    pub value: U256,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// A mined transaction receipt, reduced to what the service reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub gas_used: u128,
    pub effective_gas_price: u128,
    /// Execution status; `false` means the transaction reverted.
    pub success: bool,
}

impl ChainReceipt {
    /// `gas_used × effective_gas_price`, in wei.
    pub fn gas_cost_wei(&self) -> U256 {
        U256::from(self.gas_used).saturating_mul(U256::from(self.effective_gas_price))
    }
}

/// One JSON-RPC endpoint with the treasury signer attached.
///
/// Implementations report provider errors verbatim through `ChainFault`.
/// Callers bound every call with their own timeout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Latest block number (`eth_blockNumber`). Used as the liveness probe.
    async fn block_number(&self) -> Result<u64, ChainFault>;

    /// Balance of `address` at the latest block, in wei.
    async fn balance(&self, address: Address) -> Result<U256, ChainFault>;

    /// Current gas price, in wei.
    async fn gas_price(&self) -> Result<u128, ChainFault>;

    /// Sign and broadcast a transfer. Returns once the node accepts it.
    async fn send_transfer(&self, tx: TransferTx) -> Result<TxHash, ChainFault>;

    /// Receipt of a mined transaction, or `None` while it is pending.
    async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<ChainReceipt>, ChainFault>;

    /// Whether the node still knows the transaction (pending or mined).
    async fn transaction_known(&self, tx_hash: TxHash) -> Result<bool, ChainFault>;
}

/// Builds signing clients for endpoints.
#[cfg_attr(test, mockall::automock)]
pub trait Connector: Send + Sync {
    /// Address of the key every client signs with.
    fn signer_address(&self) -> Address;

    /// Build a client for `endpoint`. Does not touch the network.
    fn connect(&self, endpoint: &ProviderEndpoint) -> Result<Arc<dyn ChainClient>, ChainFault>;
}
