//! Process-scoped service context.
//!
//! Owns every component and is shared as `Arc<ServiceContext>` by the HTTP
//! handlers and the background tasks. External collaborators (RPC
//! connector, price feeds, balance fallback) are injected so tests can swap
//! them for in-memory doubles.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use chrono::{DateTime, Utc};

use crate::chain::selector::ChainProviderSelector;
use crate::chain::Connector;
use crate::config::AppConfig;
use crate::engine::{spawn_periodic, AccrualEngine, DisbursementPipeline, PeriodicTask};
use crate::oracle::{PriceOracle, PriceSource};
use crate::treasury::{BalanceFallback, BalanceGate};
use crate::types::ProviderEndpoint;

/// External dependencies of the service.
pub struct Collaborators {
    pub connector: Arc<dyn Connector>,
    pub endpoints: Vec<ProviderEndpoint>,
    pub price_sources: Vec<Arc<dyn PriceSource>>,
    pub balance_fallback: Option<Arc<dyn BalanceFallback>>,
}

/// Addresses resolved from the environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreasuryAddresses {
    /// Echoed by `/execute`; never used as a destination.
    pub fee_recipient: Option<Address>,
    /// Destination when a request names none.
    pub default_destination: Option<Address>,
}

pub struct ServiceContext {
    pub config: AppConfig,
    pub oracle: Arc<PriceOracle>,
    pub selector: Arc<ChainProviderSelector>,
    pub balance: Arc<BalanceGate>,
    pub accrual: Arc<AccrualEngine>,
    pub disbursement: DisbursementPipeline,
    pub fee_recipient: Option<Address>,
    pub started_at: DateTime<Utc>,
}

impl ServiceContext {
    pub fn new(config: AppConfig, collaborators: Collaborators, addresses: TreasuryAddresses) -> Self {
        let oracle = Arc::new(PriceOracle::new(collaborators.price_sources, &config.oracle));
        let selector = Arc::new(ChainProviderSelector::new(
            collaborators.endpoints,
            collaborators.connector,
            Duration::from_secs(config.treasury.rpc_timeout_secs),
        ));
        let balance = Arc::new(BalanceGate::new(
            selector.clone(),
            collaborators.balance_fallback,
            config.balance.funding_floor_eth,
        ));
        let accrual = Arc::new(AccrualEngine::new(
            balance.clone(),
            oracle.clone(),
            config.accrual.profile,
            config.accrual.profit_per_trade,
        ));
        let disbursement = DisbursementPipeline::new(
            selector.clone(),
            oracle.clone(),
            addresses.default_destination,
            config.disbursement.clone(),
        );

        Self {
            config,
            oracle,
            selector,
            balance,
            accrual,
            disbursement,
            fee_recipient: addresses.fee_recipient,
            started_at: Utc::now(),
        }
    }

    /// Start the price, balance, accrual and merge timers.
    pub fn spawn_background(&self) -> Vec<PeriodicTask> {
        let oracle_cfg = &self.config.oracle;
        let balance_cfg = &self.config.balance;
        let accrual_cfg = &self.config.accrual;

        let oracle = self.oracle.clone();
        let price = spawn_periodic(
            "price-oracle",
            Duration::ZERO,
            Duration::from_secs(oracle_cfg.refresh_interval_secs.max(1)),
            move || {
                let oracle = oracle.clone();
                async move {
                    oracle.refresh().await;
                }
            },
        );

        let gate = self.balance.clone();
        let balance = spawn_periodic(
            "balance-gate",
            Duration::from_secs(balance_cfg.initial_delay_secs),
            Duration::from_secs(balance_cfg.refresh_interval_secs.max(1)),
            move || {
                let gate = gate.clone();
                async move {
                    gate.refresh().await;
                }
            },
        );

        let engine = self.accrual.clone();
        let tick = spawn_periodic(
            "accrual-tick",
            Duration::from_secs(accrual_cfg.start_delay_secs),
            accrual_cfg.profile.tick_interval(),
            move || {
                let engine = engine.clone();
                async move {
                    engine.tick().await;
                }
            },
        );

        let engine = self.accrual.clone();
        let merge_every = Duration::from_secs(accrual_cfg.merge_interval_secs.max(1));
        let merge = spawn_periodic("accrual-merge", merge_every, merge_every, move || {
            let engine = engine.clone();
            async move {
                engine.merge().await;
            }
        });

        vec![price, balance, tick, merge]
    }

    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}
