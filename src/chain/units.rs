//! Wei / gwei / ETH conversions.
//!
//! ETH amounts flow through the service as `Decimal`; only the chain
//! boundary speaks wei. `Decimal` holds 28 significant digits, which covers
//! every realistic treasury balance at full 18-decimal precision.

use alloy::primitives::U256;
use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places in one ETH, expressed in wei.
pub const ETH_DECIMALS: u32 = 18;

/// Wei in one gwei.
pub const WEI_PER_GWEI: u128 = 1_000_000_000;

/// Upper bound on amounts converted to wei (1e9 ETH).
const MAX_CONVERTIBLE_ETH: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

/// Convert wei to ETH. Saturates at `Decimal::MAX` for values beyond
/// `Decimal` range, which no real balance reaches.
pub fn wei_to_eth(wei: U256) -> Decimal {
    u128::try_from(wei)
        .ok()
        .and_then(|w| i128::try_from(w).ok())
        .and_then(|w| Decimal::try_from_i128_with_scale(w, ETH_DECIMALS).ok())
        .map(|d| d.normalize())
        .unwrap_or(Decimal::MAX)
}

/// Convert wei (as `u128`) to ETH.
pub fn wei_u128_to_eth(wei: u128) -> Decimal {
    wei_to_eth(U256::from(wei))
}

/// Convert ETH to wei, truncating anything below 1 wei.
///
/// Returns `None` for negative amounts or amounts above 1e9 ETH.
pub fn eth_to_wei(eth: Decimal) -> Option<U256> {
    if eth < Decimal::ZERO || eth > MAX_CONVERTIBLE_ETH {
        return None;
    }
    let mut scaled = eth.round_dp_with_strategy(ETH_DECIMALS, RoundingStrategy::ToZero);
    scaled.rescale(ETH_DECIMALS);
    u128::try_from(scaled.mantissa()).ok().map(U256::from)
}

pub fn gwei_to_wei(gwei: u64) -> u128 {
    u128::from(gwei) * WEI_PER_GWEI
}

/// Wei to gwei, for logging.
pub fn wei_to_gwei(wei: u128) -> Decimal {
    i128::try_from(wei)
        .ok()
        .and_then(|w| Decimal::try_from_i128_with_scale(w, 9).ok())
        .map(|d| d.round_dp(3))
        .unwrap_or(Decimal::MAX)
}

/// `gas_price × gas_limit × multiplier`, saturating.
pub fn gas_cost_wei(gas_price: u128, gas_limit: u64, multiplier: u64) -> U256 {
    U256::from(gas_price)
        .saturating_mul(U256::from(gas_limit))
        .saturating_mul(U256::from(multiplier))
}
