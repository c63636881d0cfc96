//! Domain types for the netting batch engine.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: PoolId, Address, RequestId, Epoch, RoundId
//! - Operation requests and the pool ledger
//! - Batch records and per-entry outcomes

pub mod batch;
pub mod decimal;
pub mod ledger;
pub mod primitives;
pub mod request;

pub use batch::{
    BatchRecord, LiquidationOutcome, LiquidationStaleError, LiquidationStatus, PerAccountError,
    RoundTotals, SkippedEntry,
};
pub use decimal::{Decimal, SHARE_SCALE};
pub use ledger::{amount_from_shares, shares_from_amount, AccountBorrow, PoolLedgerState, PoolParams};
pub use primitives::{Address, AddressParseError, Epoch, PoolId, RequestId, RoundId};
pub use request::{OpKind, OpType, OperationRequest};
