//! Balance-gated accrual engine.
//!
//! A periodic counter that only advances while the cached treasury balance
//! is at or above the funding floor and the operator has not paused it.
//! Ticks add into short-lived accumulators; `merge` drains them into the
//! long-lived totals. Both run under the same ledger lock, so a merge never
//! loses or double-counts a tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::oracle::PriceOracle;
use crate::treasury::BalanceGate;
use crate::types::{CachedBalance, EngineProfile, EngineState};

/// Counters guarded by one lock.
#[derive(Debug, Clone, Default, PartialEq)]
struct AccrualLedger {
    /// Trades since the last merge.
    executions: u64,
    /// USD earned since the last merge.
    earnings: Decimal,
    total_pnl: Decimal,
    total_trades: u64,
    last_state: Option<EngineState>,
    activated_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccrualSnapshot {
    pub profile: EngineProfile,
    pub state: EngineState,
    pub paused: bool,
    /// Not yet merged.
    pub pending_executions: u64,
    pub pending_earnings: Decimal,
    /// Merged totals.
    pub total_pnl: Decimal,
    pub total_trades: u64,
    pub hourly_rate: Decimal,
    pub activated_at: Option<DateTime<Utc>>,
}

impl AccrualSnapshot {
    /// Merged PnL plus anything still pending.
    pub fn pnl_including_pending(&self) -> Decimal {
        self.total_pnl + self.pending_earnings
    }

    pub fn trades_including_pending(&self) -> u64 {
        self.total_trades + self.pending_executions
    }
}

pub struct AccrualEngine {
    balance: Arc<BalanceGate>,
    oracle: Arc<PriceOracle>,
    profile: EngineProfile,
    profit_per_trade: Decimal,
    floor: Decimal,
    started_at: DateTime<Utc>,
    paused: AtomicBool,
    ledger: Mutex<AccrualLedger>,
}

/// Decide the engine state from the cached balance. The floor is inclusive.
pub fn evaluate(balance: &CachedBalance, paused: bool, floor: Decimal) -> EngineState {
    if paused || !balance.is_set() {
        EngineState::Waiting
    } else if balance.eth >= floor {
        EngineState::Active
    } else {
        EngineState::Starved
    }
}

impl AccrualEngine {
    pub fn new(
        balance: Arc<BalanceGate>,
        oracle: Arc<PriceOracle>,
        profile: EngineProfile,
        profit_per_trade: Decimal,
    ) -> Self {
        let floor = balance.floor();
        Self {
            balance,
            oracle,
            profile,
            profit_per_trade,
            floor,
            started_at: Utc::now(),
            paused: AtomicBool::new(false),
            ledger: Mutex::new(AccrualLedger::default()),
        }
    }

    pub fn profile(&self) -> EngineProfile {
        self.profile
    }

    /// Re-evaluate state and, when active, accrue one batch.
    pub async fn tick(&self) -> EngineState {
        let balance = self.balance.current().await;
        let state = evaluate(&balance, self.is_paused(), self.floor);
        let price = match state {
            EngineState::Active => Some(self.oracle.current_price().await),
            _ => None,
        };

        let mut ledger = self.ledger.lock().await;
        if ledger.last_state != Some(state) {
            self.log_transition(ledger.last_state, state, &balance);
            ledger.last_state = Some(state);
        }

        if let Some(price) = price {
            if ledger.activated_at.is_none() {
                info!(
                    balance = %balance.eth,
                    profile = %self.profile,
                    tps = self.profile.nominal_tps(),
                    "Accrual engine activated"
                );
                ledger.activated_at = Some(Utc::now());
            }
            let batch = self.profile.batch_size();
            ledger.executions += batch;
            ledger.earnings += Decimal::from(batch) * self.profit_per_trade * price;
        }

        state
    }

    fn log_transition(&self, from: Option<EngineState>, to: EngineState, balance: &CachedBalance) {
        match to {
            EngineState::Waiting if self.is_paused() => {
                info!(from = ?from, "Accrual engine paused")
            }
            EngineState::Waiting => info!("Accrual engine waiting for first balance check"),
            EngineState::Starved => warn!(
                balance = %balance.eth,
                floor = %self.floor,
                shortfall = %(self.floor - balance.eth),
                "Accrual engine starved, treasury below funding floor"
            ),
            EngineState::Active => info!(from = ?from, balance = %balance.eth, "Accrual engine active"),
        }
    }

    /// Drain the accumulators into the totals. Returns what was merged.
    pub async fn merge(&self) -> (u64, Decimal) {
        let mut guard = self.ledger.lock().await;
        let ledger = &mut *guard;
        let merged = (ledger.executions, ledger.earnings);

        ledger.total_pnl += merged.1;
        ledger.total_trades += merged.0;
        ledger.executions = 0;
        ledger.earnings = Decimal::ZERO;

        if merged.0 > 0 {
            debug!(
                trades = merged.0,
                earnings = %merged.1.round_dp(4),
                total_pnl = %ledger.total_pnl.round_dp(2),
                "Accruals merged"
            );
        }
        merged
    }

    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!("Accrual paused by operator");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("Accrual resumed by operator");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Current state, computed from the cache rather than the last tick.
    pub async fn state(&self) -> EngineState {
        evaluate(&self.balance.current().await, self.is_paused(), self.floor)
    }

    pub async fn snapshot(&self) -> AccrualSnapshot {
        let state = self.state().await;
        let ledger = self.ledger.lock().await.clone();
        AccrualSnapshot {
            profile: self.profile,
            state,
            paused: self.is_paused(),
            pending_executions: ledger.executions,
            pending_earnings: ledger.earnings,
            total_pnl: ledger.total_pnl,
            total_trades: ledger.total_trades,
            hourly_rate: hourly_rate(ledger.total_pnl, Utc::now() - self.started_at),
            activated_at: ledger.activated_at,
        }
    }
}

/// `pnl / hours_running`, zero before any time has elapsed.
pub fn hourly_rate(pnl: Decimal, running: chrono::Duration) -> Decimal {
    let millis = running.num_milliseconds();
    if millis <= 0 {
        return Decimal::ZERO;
    }
    let hours = Decimal::from(millis) / Decimal::from(3_600_000u32);
    (pnl / hours).round_dp(6)
}
