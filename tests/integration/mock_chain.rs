//! In-memory chain for integration testing.
//!
//! Provides a deterministic `ChainClient` that holds a balance, a gas price
//! and a block height, mines every accepted transfer into the next block,
//! and records what it was asked to send. A matching `Connector` maps
//! endpoint names to chains (or to connection failures).

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, TxHash, B256, U256};
use async_trait::async_trait;

use treasury_gate::chain::{ChainClient, ChainReceipt, Connector, TransferTx};
use treasury_gate::types::{ChainFault, ChainFaultKind, ProviderEndpoint};

pub const TREASURY: Address = Address::repeat_byte(0xaa);

pub fn wei(eth: &str) -> U256 {
    let d: rust_decimal::Decimal = eth.parse().unwrap();
    treasury_gate::chain::units::eth_to_wei(d).unwrap()
}

/// A deterministic single-account chain.
pub struct MockChain {
    balance: Mutex<U256>,
    gas_price: Mutex<u128>,
    head: Mutex<u64>,
    sent: Mutex<Vec<TransferTx>>,
    receipts: Mutex<HashMap<TxHash, ChainReceipt>>,
    /// If set, `send_transfer` fails with this fault.
    send_error: Mutex<Option<ChainFault>>,
    /// Mine the next transfer with a failed status.
    revert_next: AtomicBool,
    /// When down, every call fails.
    down: AtomicBool,
    /// Time the node takes to accept a transfer.
    send_latency_ms: AtomicU64,
    in_flight: AtomicUsize,
    /// Most transfers ever being accepted at the same time.
    max_in_flight: AtomicUsize,
}

impl MockChain {
    pub fn new(balance: U256, gas_price: u128) -> Arc<Self> {
        Arc::new(Self {
            balance: Mutex::new(balance),
            gas_price: Mutex::new(gas_price),
            head: Mutex::new(19_000_000),
            sent: Mutex::new(Vec::new()),
            receipts: Mutex::new(HashMap::new()),
            send_error: Mutex::new(None),
            revert_next: AtomicBool::new(false),
            down: AtomicBool::new(false),
            send_latency_ms: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn set_balance(&self, balance: U256) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn balance_now(&self) -> U256 {
        *self.balance.lock().unwrap()
    }

    pub fn set_send_error(&self, fault: ChainFault) {
        *self.send_error.lock().unwrap() = Some(fault);
    }

    pub fn revert_next(&self) {
        self.revert_next.store(true, Ordering::SeqCst);
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_send_latency(&self, latency: Duration) {
        self.send_latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Highest number of overlapping `send_transfer` calls seen.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Transfers accepted so far.
    pub fn sent(&self) -> Vec<TransferTx> {
        self.sent.lock().unwrap().clone()
    }

    /// Validate and mine a transfer into the next block.
    fn mine(&self, tx: TransferTx) -> Result<TxHash, ChainFault> {
        if let Some(fault) = self.send_error.lock().unwrap().clone() {
            return Err(fault);
        }

        let gas_price = *self.gas_price.lock().unwrap();
        let effective = gas_price.min(tx.max_fee_per_gas);
        let gas_cost = U256::from(21_000u64) * U256::from(effective);

        let mut balance = self.balance.lock().unwrap();
        let needed = tx.value + gas_cost;
        if needed > *balance {
            return Err(ChainFault::rpc("insufficient funds for gas * price + value")
                .with_code(-32000)
                .with_reason("insufficient funds for gas * price + value"));
        }

        let success = !self.revert_next.swap(false, Ordering::SeqCst);
        *balance -= if success { needed } else { gas_cost };

        let mut sent = self.sent.lock().unwrap();
        sent.push(tx);
        let tx_hash = B256::left_padding_from(&(sent.len() as u64).to_be_bytes());

        let mut head = self.head.lock().unwrap();
        *head += 1;
        self.receipts.lock().unwrap().insert(
            tx_hash,
            ChainReceipt {
                tx_hash,
                block_number: *head,
                gas_used: 21_000,
                effective_gas_price: effective,
                success,
            },
        );
        Ok(tx_hash)
    }

    fn check_up(&self) -> Result<(), ChainFault> {
        if self.down.load(Ordering::SeqCst) {
            Err(ChainFault::rpc("connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64, ChainFault> {
        self.check_up()?;
        Ok(*self.head.lock().unwrap())
    }

    async fn balance(&self, address: Address) -> Result<U256, ChainFault> {
        self.check_up()?;
        if address == TREASURY {
            Ok(self.balance_now())
        } else {
            Ok(U256::ZERO)
        }
    }

    async fn gas_price(&self) -> Result<u128, ChainFault> {
        self.check_up()?;
        Ok(*self.gas_price.lock().unwrap())
    }

    async fn send_transfer(&self, tx: TransferTx) -> Result<TxHash, ChainFault> {
        self.check_up()?;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = self.send_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        let result = self.mine(tx);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<ChainReceipt>, ChainFault> {
        self.check_up()?;
        Ok(self.receipts.lock().unwrap().get(&tx_hash).cloned())
    }

    async fn transaction_known(&self, tx_hash: TxHash) -> Result<bool, ChainFault> {
        self.check_up()?;
        Ok(self.receipts.lock().unwrap().contains_key(&tx_hash))
    }
}

/// Maps endpoint names to chains. Unmapped names fail to connect.
pub struct MockConnector {
    chains: HashMap<String, Arc<MockChain>>,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new(chains: Vec<(&str, Arc<MockChain>)>) -> Arc<Self> {
        Arc::new(Self {
            chains: chains
                .into_iter()
                .map(|(name, chain)| (name.to_string(), chain))
                .collect(),
            connects: AtomicUsize::new(0),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn signer_address(&self) -> Address {
        TREASURY
    }

    fn connect(&self, endpoint: &ProviderEndpoint) -> Result<Arc<dyn ChainClient>, ChainFault> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.chains.get(&endpoint.name) {
            Some(chain) => Ok(chain.clone() as Arc<dyn ChainClient>),
            None => Err(ChainFault::new(
                ChainFaultKind::Rpc,
                format!("could not connect to {}", endpoint.name),
            )),
        }
    }
}

/// Endpoints named `primary`, `backup` and `spare`, in that order.
pub fn endpoints() -> Vec<ProviderEndpoint> {
    [
        "https://rpc.primary.test",
        "https://rpc.backup.test",
        "https://rpc.spare.test",
    ]
    .iter()
    .map(|u| ProviderEndpoint::parse(u).unwrap())
    .collect()
}
