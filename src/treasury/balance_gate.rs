//! Cached treasury balance, refreshed on a timer.
//!
//! The cache is the only balance the accrual engine ever looks at.
//! Disbursements always read a fresh on-chain balance instead.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::etherscan::BalanceFallback;
use super::wallet::TreasuryWallet;
use crate::chain::selector::ChainProviderSelector;
use crate::types::{BalanceSource, CachedBalance, TreasuryError};

pub struct BalanceGate {
    selector: Arc<ChainProviderSelector>,
    fallback: Option<Arc<dyn BalanceFallback>>,
    floor: Decimal,
    cache: RwLock<CachedBalance>,
}

impl BalanceGate {
    pub fn new(
        selector: Arc<ChainProviderSelector>,
        fallback: Option<Arc<dyn BalanceFallback>>,
        floor: Decimal,
    ) -> Self {
        Self {
            selector,
            fallback,
            floor,
            cache: RwLock::new(CachedBalance::unset()),
        }
    }

    /// Read the on-chain balance and cache it.
    ///
    /// Failures are logged and swallowed; the previous value stays in place.
    pub async fn refresh(&self) {
        match self.fetch().await {
            Ok((eth, via)) => self.store(eth, via).await,
            Err(e) => warn!(error = %e, "Balance refresh failed, keeping previous value"),
        }
    }

    async fn fetch(&self) -> Result<(Decimal, BalanceSource), TreasuryError> {
        let wallet = TreasuryWallet::open(&self.selector).await?;

        match wallet.balance().await {
            Ok(eth) => Ok((eth, BalanceSource::Rpc)),
            Err(fault) => {
                let Some(fallback) = &self.fallback else {
                    return Err(fault.into());
                };
                warn!(
                    rpc = %wallet.endpoint().name,
                    error = %fault.message,
                    "RPC balance read failed, trying Etherscan"
                );
                match fallback.balance_of(wallet.address()).await {
                    Ok(eth) => Ok((eth, BalanceSource::Etherscan)),
                    Err(e) => Err(fault
                        .with_reason(format!("Etherscan fallback failed: {e}"))
                        .into()),
                }
            }
        }
    }

    pub(crate) async fn store(&self, eth: Decimal, via: BalanceSource) {
        let mut cache = self.cache.write().await;
        let previous = cache.eth;
        let first = !cache.is_set();
        *cache = CachedBalance {
            eth,
            checked_at: Some(Utc::now()),
            via,
        };
        drop(cache);

        if first || previous != eth {
            if eth >= self.floor {
                info!(balance = %eth, via = ?via, "Treasury balance updated, funded");
            } else {
                info!(
                    balance = %eth,
                    via = ?via,
                    shortfall = %(self.floor - eth),
                    "Treasury balance updated, below funding floor"
                );
            }
        } else {
            debug!(balance = %eth, via = ?via, "Treasury balance unchanged");
        }
    }

    /// Last cached balance. Pure read.
    pub async fn current(&self) -> CachedBalance {
        self.cache.read().await.clone()
    }

    pub fn floor(&self) -> Decimal {
        self.floor
    }
}
