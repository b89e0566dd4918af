//! End-to-end disbursement and gating flows against the in-memory chain.

mod mock_chain;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use treasury_gate::chain::selector::ChainProviderSelector;
use treasury_gate::config::{DisbursementConfig, OracleConfig};
use treasury_gate::engine::{AccrualEngine, DisbursementPipeline};
use treasury_gate::oracle::{PriceOracle, PriceSource};
use treasury_gate::treasury::BalanceGate;
use treasury_gate::types::{
    AmountSpec, ChainFault, ChainFaultKind, EngineProfile, EngineState, TransferRequest,
    TreasuryError,
};

use mock_chain::{endpoints, wei, MockChain, MockConnector};

const DEST: &str = "0xA0D44B2B1E2E828B466a458e3D08384B950ed655";
const GWEI_20: u128 = 20_000_000_000;

struct FixedPrice(Decimal);

#[async_trait]
impl PriceSource for FixedPrice {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn fetch_price(&self) -> Result<Decimal> {
        Ok(self.0)
    }
}

async fn oracle_at(price: Decimal) -> Arc<PriceOracle> {
    let oracle = PriceOracle::new(vec![Arc::new(FixedPrice(price))], &OracleConfig::default());
    assert!(oracle.refresh().await);
    Arc::new(oracle)
}

fn selector(connector: Arc<MockConnector>) -> Arc<ChainProviderSelector> {
    Arc::new(ChainProviderSelector::new(endpoints(), connector, Duration::from_secs(5)))
}

async fn pipeline(connector: Arc<MockConnector>, price: Decimal) -> (DisbursementPipeline, Arc<ChainProviderSelector>) {
    pipeline_with(connector, price, DisbursementConfig::default()).await
}

async fn pipeline_with(
    connector: Arc<MockConnector>,
    price: Decimal,
    config: DisbursementConfig,
) -> (DisbursementPipeline, Arc<ChainProviderSelector>) {
    let selector = selector(connector);
    let pipeline = DisbursementPipeline::new(selector.clone(), oracle_at(price).await, None, config);
    (pipeline, selector)
}

fn request(amount: AmountSpec) -> TransferRequest {
    TransferRequest {
        destination: Some(DEST.to_string()),
        amount,
    }
}

// ---------------------------------------------------------------------------
// Amount resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_usd_amount_converts_at_oracle_price() {
    let chain = MockChain::new(wei("1"), GWEI_20);
    let (pipeline, _) = pipeline(MockConnector::new(vec![("primary", chain.clone())]), dec!(2000)).await;

    let receipt = pipeline.disburse(request(AmountSpec::Usd(dec!(1000)))).await.unwrap();

    assert_eq!(receipt.amount_eth, dec!(0.5));
    assert_eq!(receipt.eth_price, dec!(2000));
    assert!(receipt.confirmed);
    let sent = chain.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].value, wei("0.5"));
    assert_eq!(sent[0].to, DEST.parse::<Address>().unwrap());
}

#[tokio::test]
async fn test_percentage_of_fresh_balance() {
    let chain = MockChain::new(wei("0.02"), GWEI_20);
    let (pipeline, _) = pipeline(MockConnector::new(vec![("primary", chain.clone())]), dec!(2000)).await;

    let receipt = pipeline
        .disburse(request(AmountSpec::Percentage(dec!(50))))
        .await
        .unwrap();

    assert_eq!(receipt.amount_eth, dec!(0.01));
    assert_eq!(chain.sent()[0].value, wei("0.01"));
}

// ---------------------------------------------------------------------------
// Headroom
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_insufficient_funds_then_max_withdrawable_succeeds() {
    let chain = MockChain::new(wei("0.01"), GWEI_20);
    let (pipeline, _) = pipeline(MockConnector::new(vec![("primary", chain.clone())]), dec!(2000)).await;

    let err = pipeline
        .disburse(request(AmountSpec::Eth(dec!(0.01))))
        .await
        .unwrap_err();
    let max = match err {
        TreasuryError::InsufficientFunds { max_withdrawable, gas_estimate, .. } => {
            assert_eq!(gas_estimate, dec!(0.00084));
            max_withdrawable
        }
        other => panic!("expected InsufficientFunds, got {other:?}"),
    };
    assert_eq!(max, dec!(0.00866));
    assert!(chain.sent().is_empty());
    assert_eq!(chain.balance_now(), wei("0.01"));

    // Asking for exactly the reported maximum goes through
    let receipt = pipeline.disburse(request(AmountSpec::Eth(max))).await.unwrap();
    assert_eq!(receipt.amount_eth, dec!(0.00866));
    assert!(chain.balance_now() > U256::ZERO);
}

#[tokio::test]
async fn test_full_balance_percentage_is_rejected_with_headroom() {
    let chain = MockChain::new(wei("0.05"), GWEI_20);
    let (pipeline, _) = pipeline(MockConnector::new(vec![("primary", chain.clone())]), dec!(2000)).await;

    let err = pipeline
        .disburse(request(AmountSpec::Percentage(dec!(100))))
        .await
        .unwrap_err();
    assert!(matches!(err, TreasuryError::InsufficientFunds { .. }));
    assert!(chain.sent().is_empty());
}

// ---------------------------------------------------------------------------
// Connectivity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_all_endpoints_down_mutates_nothing() {
    let chain = MockChain::new(wei("1"), GWEI_20);
    chain.set_down(true);
    let connector = MockConnector::new(vec![("primary", chain.clone()), ("backup", chain.clone())]);
    let (pipeline, selector) = pipeline(connector.clone(), dec!(2000)).await;

    let err = pipeline
        .disburse(request(AmountSpec::Eth(dec!(0.1))))
        .await
        .unwrap_err();

    match err {
        TreasuryError::Connectivity { attempted, last_error } => {
            assert_eq!(attempted, 3);
            assert!(last_error.contains("spare"));
        }
        other => panic!("expected Connectivity, got {other:?}"),
    }
    assert_eq!(connector.connects(), 3);
    assert!(chain.sent().is_empty());
    assert_eq!(chain.balance_now(), wei("1"));
    assert!(selector.live_endpoint().await.is_none());
}

#[tokio::test]
async fn test_failover_to_backup_endpoint() {
    let primary = MockChain::new(wei("1"), GWEI_20);
    primary.set_down(true);
    let backup = MockChain::new(wei("1"), GWEI_20);
    let connector = MockConnector::new(vec![("primary", primary.clone()), ("backup", backup.clone())]);
    let (pipeline, selector) = pipeline(connector, dec!(2000)).await;

    pipeline.disburse(request(AmountSpec::Eth(dec!(0.1)))).await.unwrap();

    assert!(primary.sent().is_empty());
    assert_eq!(backup.sent().len(), 1);
    assert_eq!(selector.live_endpoint().await.as_deref(), Some("backup"));
}

#[tokio::test]
async fn test_invalid_request_never_touches_chain() {
    let chain = MockChain::new(wei("1"), GWEI_20);
    let connector = MockConnector::new(vec![("primary", chain.clone())]);
    let (pipeline, _) = pipeline(connector.clone(), dec!(2000)).await;

    let err = pipeline
        .disburse(TransferRequest {
            destination: Some("0xdeadbeef".into()),
            amount: AmountSpec::Eth(dec!(0.1)),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TreasuryError::Validation(_)));

    let err = pipeline
        .disburse(request(AmountSpec::Percentage(dec!(150))))
        .await
        .unwrap_err();
    assert!(matches!(err, TreasuryError::Validation(_)));

    assert_eq!(connector.connects(), 0);
}

// ---------------------------------------------------------------------------
// Chain failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_provider_error_is_passed_through() {
    let chain = MockChain::new(wei("1"), GWEI_20);
    chain.set_send_error(
        ChainFault::rpc("replacement transaction underpriced")
            .with_code(-32000)
            .with_reason("replacement transaction underpriced"),
    );
    let (pipeline, _) = pipeline(MockConnector::new(vec![("primary", chain.clone())]), dec!(2000)).await;

    let err = pipeline
        .disburse(request(AmountSpec::Eth(dec!(0.1))))
        .await
        .unwrap_err();
    match err {
        TreasuryError::Chain(fault) => {
            assert_eq!(fault.kind, ChainFaultKind::Rpc);
            assert_eq!(fault.code, Some(-32000));
            assert_eq!(fault.reason.as_deref(), Some("replacement transaction underpriced"));
        }
        other => panic!("expected Chain, got {other:?}"),
    }
    // Never retried
    assert!(chain.sent().is_empty());
}

#[tokio::test]
async fn test_reverted_transfer_reports_hash() {
    let chain = MockChain::new(wei("1"), GWEI_20);
    chain.revert_next();
    let (pipeline, _) = pipeline(MockConnector::new(vec![("primary", chain.clone())]), dec!(2000)).await;

    let err = pipeline
        .disburse(request(AmountSpec::Eth(dec!(0.1))))
        .await
        .unwrap_err();
    match err {
        TreasuryError::Chain(fault) => {
            assert_eq!(fault.kind, ChainFaultKind::Reverted);
            assert!(fault.tx_hash.is_some());
        }
        other => panic!("expected Chain, got {other:?}"),
    }
    assert_eq!(chain.sent().len(), 1);
}

/// Fire four 0.2 ETH disbursements at once against a node that is slow to
/// accept transfers. Returns the number that succeeded and the chain.
async fn concurrent_burst(config: DisbursementConfig) -> (usize, Arc<MockChain>) {
    let chain = MockChain::new(wei("1"), GWEI_20);
    chain.set_send_latency(Duration::from_millis(50));
    let (pipeline, _) = pipeline_with(MockConnector::new(vec![("primary", chain.clone())]), dec!(2000), config).await;
    let pipeline = Arc::new(pipeline);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let p = pipeline.clone();
            tokio::spawn(async move { p.disburse(request(AmountSpec::Eth(dec!(0.2)))).await })
        })
        .collect();

    let mut ok = 0;
    for h in handles {
        if h.await.unwrap().is_ok() {
            ok += 1;
        }
    }
    (ok, chain)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_disbursements_are_serialized() {
    let (ok, chain) = concurrent_burst(DisbursementConfig::default()).await;

    assert_eq!(ok, 4);
    assert_eq!(chain.max_in_flight(), 1);
    assert_eq!(chain.sent().len(), 4);
    // 1 − 4 × (0.2 + 0.00042)
    assert_eq!(chain.balance_now(), wei("0.19832"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unserialized_disbursements_overlap() {
    let config = DisbursementConfig {
        serialize: false,
        ..DisbursementConfig::default()
    };
    let (ok, chain) = concurrent_burst(config).await;

    assert_eq!(ok, 4);
    assert!(chain.max_in_flight() > 1, "sends never overlapped");
}

// ---------------------------------------------------------------------------
// Balance gate → accrual
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_accrual_follows_cached_balance() {
    let chain = MockChain::new(wei("0.005"), GWEI_20);
    let selector = selector(MockConnector::new(vec![("primary", chain.clone())]));
    let gate = Arc::new(BalanceGate::new(selector, None, dec!(0.01)));
    let engine = AccrualEngine::new(gate.clone(), oracle_at(dec!(2000)).await, EngineProfile::Mega, dec!(0.00001));

    // Nothing accrues before the first balance check
    assert_eq!(engine.tick().await, EngineState::Waiting);

    gate.refresh().await;
    assert_eq!(engine.tick().await, EngineState::Starved);

    // Funding the treasury is picked up on the next refresh
    chain.set_balance(wei("0.01"));
    assert_eq!(engine.tick().await, EngineState::Starved);
    gate.refresh().await;
    assert_eq!(engine.tick().await, EngineState::Active);

    // An outage keeps the last known balance
    chain.set_down(true);
    gate.refresh().await;
    assert_eq!(engine.tick().await, EngineState::Active);

    let snap = engine.snapshot().await;
    assert_eq!(snap.trades_including_pending(), 2_000);
    assert_eq!(snap.pnl_including_pending(), dec!(40));
}

// ---------------------------------------------------------------------------
// In-memory chain
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_mock_chain_mines_transfers() {
    use treasury_gate::chain::{ChainClient, TransferTx};

    let chain = MockChain::new(wei("1"), 10_000_000_000);
    let hash = chain
        .send_transfer(TransferTx {
            to: Address::repeat_byte(0xbb),
            value: wei("0.5"),
            gas_limit: 21_000,
            max_fee_per_gas: 20_000_000_000,
            max_priority_fee_per_gas: 2_000_000_000,
        })
        .await
        .unwrap();

    let receipt = chain.transaction_receipt(hash).await.unwrap().unwrap();
    assert!(receipt.success);
    assert_eq!(receipt.block_number, 19_000_001);
    assert_eq!(chain.balance_now(), wei("0.49979"));
    assert_eq!(chain.max_in_flight(), 1);
}

#[tokio::test]
async fn test_mock_chain_down() {
    use treasury_gate::chain::ChainClient;

    let chain = MockChain::new(wei("1"), 1);
    chain.set_down(true);
    assert!(chain.block_number().await.is_err());
}
