//! The disbursement pipeline: resolve → headroom check → submit → confirm.
//!
//! Every route that moves value out of the treasury funnels through
//! `DisbursementPipeline::disburse`. Request shape problems are rejected
//! before any network call; the balance and gas price are always read fresh
//! (never from the balance cache); the submission is never retried.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::chain::selector::ChainProviderSelector;
use crate::chain::units::{eth_to_wei, gas_cost_wei, gwei_to_wei, wei_to_eth, wei_to_gwei};
use crate::config::DisbursementConfig;
use crate::oracle::PriceOracle;
use crate::treasury::{GasParams, TreasuryWallet};
use crate::types::{AmountSpec, TransferReceipt, TransferRequest, TreasuryError};

const HUNDRED: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

pub struct DisbursementPipeline {
    selector: Arc<ChainProviderSelector>,
    oracle: Arc<PriceOracle>,
    default_destination: Option<Address>,
    config: DisbursementConfig,
    /// Held for the whole pipeline when serialization is on.
    lock: Option<Mutex<()>>,
}

impl DisbursementPipeline {
    pub fn new(
        selector: Arc<ChainProviderSelector>,
        oracle: Arc<PriceOracle>,
        default_destination: Option<Address>,
        config: DisbursementConfig,
    ) -> Self {
        let lock = config.serialize.then(|| Mutex::new(()));
        Self {
            selector,
            oracle,
            default_destination,
            config,
            lock,
        }
    }

    pub fn default_destination(&self) -> Option<Address> {
        self.default_destination
    }

    /// Move value from the treasury and wait for confirmation.
    pub async fn disburse(&self, request: TransferRequest) -> Result<TransferReceipt, TreasuryError> {
        let request_id = Uuid::new_v4();
        let span = info_span!("disbursement", request_id = %request_id);
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: TransferRequest) -> Result<TransferReceipt, TreasuryError> {
        // -- Shape checks (no network) -----------------------------------
        let destination = resolve_destination(request.destination.as_deref(), self.default_destination)?;
        validate_amount(&request.amount)?;

        let _guard = match &self.lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        // -- Fresh balance and gas price ---------------------------------
        let wallet = TreasuryWallet::open(&self.selector).await?;
        let (balance_wei, gas_price) = tokio::try_join!(wallet.balance_wei(), wallet.gas_price())?;
        let balance = wei_to_eth(balance_wei);
        let price = self.oracle.current_price().await;

        // -- Amount ------------------------------------------------------
        let requested = resolve_amount(request.amount, balance, price)?;
        let amount_wei = eth_to_wei(requested)
            .ok_or_else(|| TreasuryError::validation(format!("Amount out of range: {requested} ETH")))?;
        if amount_wei.is_zero() {
            return Err(TreasuryError::validation("Amount must be at least 1 wei"));
        }
        let amount_eth = wei_to_eth(amount_wei);

        // -- Headroom ----------------------------------------------------
        let total_needed = total_needed_wei(amount_wei, gas_price, &self.config);
        if total_needed > balance_wei {
            let gas_estimate = wei_to_eth(total_needed - amount_wei);
            let err = TreasuryError::InsufficientFunds {
                available: balance,
                requested: amount_eth,
                gas_estimate,
                total_needed: wei_to_eth(total_needed),
                max_withdrawable: max_withdrawable(balance, gas_estimate, self.config.withdraw_buffer_eth),
            };
            warn!(error = %err, rpc = %wallet.endpoint().name, "Disbursement rejected");
            return Err(err);
        }

        // -- Submit ------------------------------------------------------
        let gas = gas_params(gas_price, &self.config);
        info!(
            to = %destination,
            amount_eth = %amount_eth,
            amount_usd = %(amount_eth * price).round_dp(2),
            balance = %balance,
            gas_price_gwei = %wei_to_gwei(gas_price),
            rpc = %wallet.endpoint().name,
            "Submitting transfer"
        );
        let tx_hash = wallet.submit(destination, amount_wei, gas).await?;
        info!(tx = %tx_hash, "Transfer broadcast, awaiting confirmation");

        // -- Confirm -----------------------------------------------------
        let receipt = wallet
            .await_confirmation(tx_hash, self.config.confirmations, self.config.confirmation_timeout())
            .await?;

        let receipt = TransferReceipt {
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            gas_cost_eth: wei_to_eth(receipt.gas_cost_wei()),
            amount_eth,
            amount_usd: (amount_eth * price).round_dp(2),
            eth_price: price,
            destination,
            confirmed: true,
        };
        info!(
            tx = %receipt.tx_hash,
            block = receipt.block_number,
            gas_used = %receipt.gas_used,
            "Transfer confirmed"
        );
        Ok(receipt)
    }
}

// ---------------------------------------------------------------------------
// Resolution policies
// ---------------------------------------------------------------------------

/// Caller address, else the configured default.
pub fn resolve_destination(
    requested: Option<&str>,
    default: Option<Address>,
) -> Result<Address, TreasuryError> {
    let address = match requested.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Address::from_str(raw)
            .map_err(|_| TreasuryError::validation(format!("Invalid destination address: {raw}")))?,
        None => default.ok_or_else(|| {
            TreasuryError::validation("No destination address given and no default configured")
        })?,
    };
    if address.is_zero() {
        return Err(TreasuryError::validation("Refusing to send to the zero address"));
    }
    Ok(address)
}

/// Checks that need no balance or price.
pub fn validate_amount(amount: &AmountSpec) -> Result<(), TreasuryError> {
    match *amount {
        AmountSpec::Percentage(pct) if pct <= Decimal::ZERO || pct > HUNDRED => Err(
            TreasuryError::validation(format!("Percentage must be in (0, 100], got {pct}")),
        ),
        AmountSpec::Eth(v) | AmountSpec::Usd(v) if v <= Decimal::ZERO => {
            Err(TreasuryError::validation(format!("Amount must be positive, got {v}")))
        }
        _ => Ok(()),
    }
}

/// Resolve an amount to ETH against a fresh balance and the oracle price.
///
/// A percentage applies to the whole fresh balance.
pub fn resolve_amount(amount: AmountSpec, balance: Decimal, price: Decimal) -> Result<Decimal, TreasuryError> {
    validate_amount(&amount)?;
    let eth = match amount {
        AmountSpec::Eth(eth) => eth,
        AmountSpec::Percentage(pct) => balance
            .checked_mul(pct)
            .and_then(|v| v.checked_div(HUNDRED))
            .ok_or_else(|| TreasuryError::validation("Percentage amount out of range"))?,
        AmountSpec::Usd(usd) => usd
            .checked_div(price)
            .ok_or_else(|| TreasuryError::validation("Cannot convert USD without a price"))?,
    };
    if eth <= Decimal::ZERO {
        return Err(TreasuryError::validation("Resolved amount is zero"));
    }
    Ok(eth)
}

/// `max(0, balance − gas_estimate − buffer)`.
pub fn max_withdrawable(balance: Decimal, gas_estimate: Decimal, buffer: Decimal) -> Decimal {
    (balance - gas_estimate - buffer).max(Decimal::ZERO)
}

/// Max fee is a multiple of the current gas price; the tip is clamped so it
/// never exceeds the max fee.
pub fn gas_params(gas_price: u128, config: &DisbursementConfig) -> GasParams {
    let max_fee_per_gas = gas_price.saturating_mul(u128::from(config.max_fee_multiplier));
    let tip = gwei_to_wei(config.priority_fee_gwei).min(max_fee_per_gas);
    GasParams {
        gas_limit: config.gas_limit,
        max_fee_per_gas,
        max_priority_fee_per_gas: tip,
    }
}

/// Wei needed for `amount` plus the gas headroom at `gas_price`.
pub fn total_needed_wei(amount: U256, gas_price: u128, config: &DisbursementConfig) -> U256 {
    amount.saturating_add(gas_cost_wei(gas_price, config.gas_limit, config.gas_safety_multiplier))
}
