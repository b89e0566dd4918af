//! The custodial treasury wallet, bound to one live RPC connection.
//!
//! A wallet is opened per operation and never pooled: `open` runs endpoint
//! selection, so every operation starts against a node that just answered.
//! Every RPC call made through the wallet is bounded by the RPC timeout.

use std::future::Future;
use std::time::Duration;

use alloy::primitives::{Address, TxHash, U256};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::chain::selector::{ActiveConnection, ChainProviderSelector};
use crate::chain::units::wei_to_eth;
use crate::chain::{ChainReceipt, TransferTx};
use crate::types::{ChainFault, ChainFaultKind, ProviderEndpoint, TreasuryError};

/// Delay between receipt polls while awaiting confirmation.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Consecutive polls in which the node has neither a receipt nor the
/// transaction before it is reported as dropped.
const DROPPED_AFTER_MISSES: u32 = 5;

/// Fee parameters for a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasParams {
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

pub struct TreasuryWallet {
    address: Address,
    connection: ActiveConnection,
    rpc_timeout: Duration,
}

impl TreasuryWallet {
    /// Select a live endpoint and bind the treasury signer to it.
    pub async fn open(selector: &ChainProviderSelector) -> Result<Self, TreasuryError> {
        let connection = selector.select().await?;
        Ok(Self {
            address: selector.treasury_address(),
            connection,
            rpc_timeout: selector.rpc_timeout(),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn endpoint(&self) -> &ProviderEndpoint {
        &self.connection.endpoint
    }

    pub async fn balance_wei(&self) -> Result<U256, ChainFault> {
        self.bounded("eth_getBalance", self.connection.client.balance(self.address))
            .await
    }

    /// Balance in ETH.
    pub async fn balance(&self) -> Result<Decimal, ChainFault> {
        Ok(wei_to_eth(self.balance_wei().await?))
    }

    /// Current gas price, in wei.
    pub async fn gas_price(&self) -> Result<u128, ChainFault> {
        self.bounded("eth_gasPrice", self.connection.client.gas_price())
            .await
    }

    /// Sign and broadcast a value transfer. Never retried.
    pub async fn submit(
        &self,
        destination: Address,
        value: U256,
        gas: GasParams,
    ) -> Result<TxHash, ChainFault> {
        let tx = TransferTx {
            to: destination,
            value,
            gas_limit: gas.gas_limit,
            max_fee_per_gas: gas.max_fee_per_gas,
            max_priority_fee_per_gas: gas.max_priority_fee_per_gas,
        };
        self.bounded("eth_sendRawTransaction", self.connection.client.send_transfer(tx))
            .await
    }

    /// Wait until `tx_hash` is mined with `confirmations` blocks on top of
    /// (and including) its block.
    ///
    /// Fails with a `Reverted`, `Dropped` or `Timeout` fault carrying the
    /// transaction hash. Transient read errors while polling are tolerated
    /// until the deadline.
    pub async fn await_confirmation(
        &self,
        tx_hash: TxHash,
        confirmations: u64,
        timeout: Duration,
    ) -> Result<ChainReceipt, ChainFault> {
        match tokio::time::timeout(timeout, self.poll_confirmation(tx_hash, confirmations)).await {
            Ok(result) => result,
            Err(_) => Err(ChainFault::timeout(format!(
                "Transaction not confirmed within {}s",
                timeout.as_secs()
            ))
            .with_tx_hash(tx_hash)),
        }
    }

    async fn poll_confirmation(
        &self,
        tx_hash: TxHash,
        confirmations: u64,
    ) -> Result<ChainReceipt, ChainFault> {
        let client = &self.connection.client;
        let mut misses = 0u32;

        loop {
            match self
                .bounded("eth_getTransactionReceipt", client.transaction_receipt(tx_hash))
                .await
            {
                Ok(Some(receipt)) => {
                    if !receipt.success {
                        return Err(ChainFault::new(
                            ChainFaultKind::Reverted,
                            format!("Transaction reverted in block #{}", receipt.block_number),
                        )
                        .with_tx_hash(tx_hash));
                    }
                    match self.bounded("eth_blockNumber", client.block_number()).await {
                        Ok(head) if depth(head, receipt.block_number) >= confirmations => {
                            return Ok(receipt);
                        }
                        Ok(head) => {
                            debug!(tx = %tx_hash, head, mined = receipt.block_number, "Awaiting confirmations");
                        }
                        Err(fault) => {
                            warn!(tx = %tx_hash, error = %fault.message, "Block number read failed while confirming");
                        }
                    }
                }
                Ok(None) => match self
                    .bounded("eth_getTransactionByHash", client.transaction_known(tx_hash))
                    .await
                {
                    Ok(true) => misses = 0,
                    Ok(false) => {
                        misses += 1;
                        if misses >= DROPPED_AFTER_MISSES {
                            return Err(ChainFault::new(
                                ChainFaultKind::Dropped,
                                "Transaction no longer known to the node",
                            )
                            .with_tx_hash(tx_hash));
                        }
                    }
                    Err(fault) => {
                        warn!(tx = %tx_hash, error = %fault.message, "Transaction lookup failed while confirming");
                    }
                },
                Err(fault) => {
                    warn!(tx = %tx_hash, error = %fault.message, "Receipt read failed while confirming");
                }
            }

            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }

    async fn bounded<T>(
        &self,
        method: &str,
        call: impl Future<Output = Result<T, ChainFault>>,
    ) -> Result<T, ChainFault> {
        match tokio::time::timeout(self.rpc_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ChainFault::timeout(format!(
                "{method} on {} timed out after {}s",
                self.connection.endpoint.name,
                self.rpc_timeout.as_secs()
            ))),
        }
    }
}

/// Number of blocks including and above `mined` at chain head `head`.
fn depth(head: u64, mined: u64) -> u64 {
    if head < mined {
        0
    } else {
        head - mined + 1
    }
}
