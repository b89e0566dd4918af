//! Treasury wallet access and the cached balance that gates spending.

pub mod balance_gate;
pub mod etherscan;
pub mod wallet;

pub use balance_gate::BalanceGate;
pub use etherscan::{BalanceFallback, EtherscanBalance};
pub use wallet::{GasParams, TreasuryWallet};
