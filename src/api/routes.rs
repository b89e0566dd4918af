//! HTTP route handlers.
//!
//! Handlers are thin: they map request bodies to typed `TransferRequest`s
//! and component calls, and shape the JSON responses. All state is shared
//! via `Arc<ServiceContext>`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::ApiError;
use crate::context::ServiceContext;
use crate::treasury::TreasuryWallet;
use crate::types::{AmountSpec, EngineState, TransferReceipt, TransferRequest, TreasuryError};

pub type AppState = Arc<ServiceContext>;

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Union of the fields any disbursement route accepts. Each route family
/// applies its own precedence.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferBody {
    pub to: Option<String>,
    pub to_address: Option<String>,
    pub treasury: Option<String>,
    pub percentage: Option<Decimal>,
    #[serde(rename = "amountETH")]
    pub amount_eth: Option<Decimal>,
    pub amount: Option<Decimal>,
    #[serde(rename = "amountUSD")]
    pub amount_usd: Option<Decimal>,
}

fn first_of(candidates: [&Option<String>; 3]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .map(String::from)
}

impl TransferBody {
    /// Destination `to` ▸ `toAddress` ▸ `treasury`; amount `percentage` ▸
    /// `amountETH`/`amount` ▸ `amountUSD`.
    pub fn into_convert(self) -> Result<TransferRequest, TreasuryError> {
        let amount = if let Some(pct) = self.percentage {
            AmountSpec::Percentage(pct)
        } else if let Some(eth) = self.amount_eth.or(self.amount) {
            AmountSpec::Eth(eth)
        } else if let Some(usd) = self.amount_usd {
            AmountSpec::Usd(usd)
        } else {
            return Err(TreasuryError::validation(
                "Provide one of percentage, amountETH, amount or amountUSD",
            ));
        };
        Ok(TransferRequest {
            destination: first_of([&self.to, &self.to_address, &self.treasury]),
            amount,
        })
    }

    /// Destination `to` ▸ `treasury`; explicit `amount` (or `amountETH`) only.
    pub fn into_send(self) -> Result<TransferRequest, TreasuryError> {
        let eth = self
            .amount
            .or(self.amount_eth)
            .ok_or_else(|| TreasuryError::validation("amount (ETH) is required"))?;
        Ok(TransferRequest {
            destination: first_of([&self.to, &self.treasury, &None]),
            amount: AmountSpec::Eth(eth),
        })
    }

    /// Destination `treasury` ▸ `to`; amount `amountETH` ▸ `amountUSD`.
    pub fn into_fund(self) -> Result<TransferRequest, TreasuryError> {
        let amount = if let Some(eth) = self.amount_eth {
            AmountSpec::Eth(eth)
        } else if let Some(usd) = self.amount_usd {
            AmountSpec::Usd(usd)
        } else {
            return Err(TreasuryError::validation("Provide amountETH or amountUSD"));
        };
        Ok(TransferRequest {
            destination: first_of([&self.treasury, &self.to, &None]),
            amount,
        })
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BannerResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub eth_price: Decimal,
    pub last_price_update: Option<DateTime<Utc>>,
    pub engine: String,
    pub tps: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    pub eth_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: &'static str,
    pub eth_price: Decimal,
    pub price_source: String,
    pub price_age_secs: Option<i64>,
    /// Merged PnL plus unmerged accruals.
    #[serde(rename = "totalPnL")]
    pub total_pnl: Decimal,
    pub total_trades: u64,
    pub hourly_rate: Decimal,
    pub engine: String,
    pub tps: u64,
    pub engine_state: EngineState,
    pub paused: bool,
    pub backend_balance: Decimal,
    pub balance_checked_at: Option<DateTime<Utc>>,
    pub min_balance: Decimal,
    pub rpc: Option<String>,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceResponse {
    pub price: Decimal,
    pub source: String,
    pub last_update: Option<DateTime<Utc>>,
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub balance: Decimal,
    #[serde(rename = "balanceUSD")]
    pub balance_usd: Decimal,
    pub eth_price: Decimal,
    pub address: String,
    pub rpc: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsResponse {
    #[serde(rename = "totalPnL")]
    pub total_pnl: Decimal,
    pub hourly_rate: Decimal,
    pub total_trades: u64,
    pub eth_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub success: bool,
    pub message: &'static str,
    #[serde(rename = "totalPnL")]
    pub total_pnl: Decimal,
    pub total_trades: u64,
    pub eth_price: Decimal,
    pub backend_balance: Decimal,
    pub fee_recipient: Option<String>,
    pub rpc: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub success: bool,
    pub tx_hash: String,
    pub block_number: u64,
    pub gas_used: u128,
    #[serde(rename = "gasCostETH")]
    pub gas_cost_eth: Decimal,
    #[serde(rename = "amountETH")]
    pub amount_eth: Decimal,
    #[serde(rename = "amountUSD")]
    pub amount_usd: Decimal,
    pub eth_price: Decimal,
    pub to: String,
    pub confirmed: bool,
}

impl From<TransferReceipt> for TransferResponse {
    fn from(r: TransferReceipt) -> Self {
        Self {
            success: true,
            tx_hash: r.tx_hash.to_string(),
            block_number: r.block_number,
            gas_used: r.gas_used,
            gas_cost_eth: r.gas_cost_eth,
            amount_eth: r.amount_eth,
            amount_usd: r.amount_usd,
            eth_price: r.eth_price,
            to: r.destination.to_string(),
            confirmed: r.confirmed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PauseResponse {
    pub success: bool,
    pub paused: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PauseStatusResponse {
    pub paused: bool,
}

// ---------------------------------------------------------------------------
// Informational
// ---------------------------------------------------------------------------

pub async fn banner(State(ctx): State<AppState>) -> Json<BannerResponse> {
    let quote = ctx.oracle.current_quote().await;
    let profile = ctx.accrual.profile();
    Json(BannerResponse {
        status: "online",
        version: env!("CARGO_PKG_VERSION"),
        eth_price: quote.price,
        last_price_update: quote.observed_at,
        engine: profile.to_string(),
        tps: profile.nominal_tps(),
    })
}

pub async fn health(State(ctx): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        eth_price: ctx.oracle.current_price().await,
    })
}

pub async fn status(State(ctx): State<AppState>) -> Json<StatusResponse> {
    let quote = ctx.oracle.current_quote().await;
    let snapshot = ctx.accrual.snapshot().await;
    let balance = ctx.balance.current().await;

    Json(StatusResponse {
        status: "online",
        eth_price: quote.price,
        price_source: quote.source.clone(),
        price_age_secs: quote.age().map(|a| a.num_seconds()),
        total_pnl: snapshot.pnl_including_pending().round_dp(6),
        total_trades: snapshot.trades_including_pending(),
        hourly_rate: snapshot.hourly_rate,
        engine: snapshot.profile.to_string(),
        tps: snapshot.profile.nominal_tps(),
        engine_state: snapshot.state,
        paused: snapshot.paused,
        backend_balance: balance.eth,
        balance_checked_at: balance.checked_at,
        min_balance: ctx.balance.floor(),
        rpc: ctx.selector.live_endpoint().await,
        uptime_secs: ctx.uptime().num_seconds(),
    })
}

pub async fn eth_price(State(ctx): State<AppState>) -> Json<PriceResponse> {
    let quote = ctx.oracle.current_quote().await;
    let stale = ctx.oracle.is_stale().await;
    Json(PriceResponse {
        price: quote.price,
        source: quote.source,
        last_update: quote.observed_at,
        stale,
    })
}

/// Fresh on-chain balance (bypasses the cache).
pub async fn balance(State(ctx): State<AppState>) -> ApiResult<BalanceResponse> {
    let wallet = TreasuryWallet::open(&ctx.selector).await?;
    let eth = wallet.balance().await.map_err(TreasuryError::from)?;
    let price = ctx.oracle.current_price().await;
    Ok(Json(BalanceResponse {
        balance: eth,
        balance_usd: (eth * price).round_dp(2),
        eth_price: price,
        address: wallet.address().to_string(),
        rpc: wallet.endpoint().name.clone(),
    }))
}

/// Merged totals only.
pub async fn earnings(State(ctx): State<AppState>) -> Json<EarningsResponse> {
    let snapshot = ctx.accrual.snapshot().await;
    Json(EarningsResponse {
        total_pnl: snapshot.total_pnl.round_dp(6),
        hourly_rate: snapshot.hourly_rate,
        total_trades: snapshot.total_trades,
        eth_price: ctx.oracle.current_price().await,
    })
}

// ---------------------------------------------------------------------------
// Execute
// ---------------------------------------------------------------------------

/// Confirm the treasury is funded and report accrual totals.
pub async fn execute(State(ctx): State<AppState>) -> ApiResult<ExecuteResponse> {
    if ctx.accrual.is_paused() {
        return Err(TreasuryError::Paused.into());
    }

    let wallet = TreasuryWallet::open(&ctx.selector).await?;
    let balance = wallet.balance().await.map_err(TreasuryError::from)?;
    let floor = ctx.balance.floor();
    if balance < floor {
        return Err(TreasuryError::BelowFundingFloor {
            required: floor,
            current: balance,
        }
        .into());
    }

    let snapshot = ctx.accrual.snapshot().await;
    info!(balance = %balance, rpc = %wallet.endpoint().name, "Execute accepted");
    Ok(Json(ExecuteResponse {
        success: true,
        message: "Treasury funded",
        total_pnl: snapshot.pnl_including_pending().round_dp(6),
        total_trades: snapshot.trades_including_pending(),
        eth_price: ctx.oracle.current_price().await,
        backend_balance: balance,
        fee_recipient: ctx.fee_recipient.map(|a| a.to_string()),
        rpc: wallet.endpoint().name.clone(),
    }))
}

// ---------------------------------------------------------------------------
// Disbursement
// ---------------------------------------------------------------------------

async fn disburse(ctx: &ServiceContext, request: TransferRequest) -> ApiResult<TransferResponse> {
    let receipt = ctx.disbursement.disburse(request).await?;
    Ok(Json(receipt.into()))
}

/// `/convert` and its aliases: percentage, explicit ETH or USD.
pub async fn convert(
    State(ctx): State<AppState>,
    payload: Result<Json<TransferBody>, JsonRejection>,
) -> ApiResult<TransferResponse> {
    let Json(body) = payload?;
    disburse(&ctx, body.into_convert()?).await
}

/// `/send-eth` and `/transfer`: explicit ETH only.
pub async fn send_eth(
    State(ctx): State<AppState>,
    payload: Result<Json<TransferBody>, JsonRejection>,
) -> ApiResult<TransferResponse> {
    let Json(body) = payload?;
    disburse(&ctx, body.into_send()?).await
}

/// `/fund-from-earnings`: explicit ETH or USD.
pub async fn fund_from_earnings(
    State(ctx): State<AppState>,
    payload: Result<Json<TransferBody>, JsonRejection>,
) -> ApiResult<TransferResponse> {
    let Json(body) = payload?;
    disburse(&ctx, body.into_fund()?).await
}

// ---------------------------------------------------------------------------
// Pause control
// ---------------------------------------------------------------------------

pub async fn pause(State(ctx): State<AppState>) -> Json<PauseResponse> {
    ctx.accrual.pause();
    Json(PauseResponse {
        success: true,
        paused: true,
    })
}

pub async fn resume(State(ctx): State<AppState>) -> Json<PauseResponse> {
    ctx.accrual.resume();
    Json(PauseResponse {
        success: true,
        paused: false,
    })
}

pub async fn pause_status(State(ctx): State<AppState>) -> Json<PauseStatusResponse> {
    Json(PauseStatusResponse {
        paused: ctx.accrual.is_paused(),
    })
}
