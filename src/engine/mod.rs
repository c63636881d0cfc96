//! Deterministic per-pool processing: interest accrual, netting, liquidation.

pub mod accrual;
pub mod liquidation;
pub mod netting;

pub use accrual::{accrue_once, AccrualError, AccrualOutcome};
pub use liquidation::{LiquidationParams, LiquidationProcessor};
pub use netting::{allocate_shares, NettingProcessor, NettingSummary, PreparedRound};
