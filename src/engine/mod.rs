//! Background engine and the disbursement pipeline.

pub mod accrual;
pub mod disbursement;
pub mod scheduler;

pub use accrual::{AccrualEngine, AccrualSnapshot};
pub use disbursement::DisbursementPipeline;
pub use scheduler::{spawn_periodic, PeriodicTask};
