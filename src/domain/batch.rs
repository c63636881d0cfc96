//! Per-pool round outcomes: batch records, skipped entries, liquidation results.

use crate::domain::{Address, Decimal, Epoch, OpKind, PoolId, RequestId, RoundId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reason an individual replay entry was skipped. The round continues.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PerAccountError {
    #[error("deposit of {amount} is worth less than one share unit")]
    DepositBelowShareUnit { amount: Decimal },
    #[error("insufficient shares: requested {requested}, available {available}")]
    InsufficientShares {
        requested: Decimal,
        available: Decimal,
    },
    #[error("insufficient pool cash: needed {needed}, available {available}")]
    InsufficientCash { needed: Decimal, available: Decimal },
    #[error("account has a liquidity shortfall of {shortfall}")]
    AccountShortfall { shortfall: Decimal },
    #[error("borrow rejected by risk engine")]
    BorrowNotAllowed,
    #[error("nothing owed")]
    NothingOwed,
    #[error("risk engine unavailable: {0}")]
    RiskUnavailable(String),
}

/// A skipped entry together with the request it belonged to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub request_id: RequestId,
    pub op: OpKind,
    pub account: Address,
    pub error: PerAccountError,
}

/// Reason a liquidation entry was voided and refunded.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LiquidationStaleError {
    #[error("borrower is no longer underwater")]
    NotUnderwater,
    #[error("borrower owes nothing")]
    NoDebt,
    #[error("no price for pool {0}")]
    MissingPrice(PoolId),
    #[error("collateral pool {0} could not accrue")]
    CollateralUnavailable(PoolId),
    #[error("borrower holds no collateral shares")]
    NoCollateral,
    #[error("risk engine unavailable: {0}")]
    RiskUnavailable(String),
}

/// Settlement result of a single liquidation entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LiquidationStatus {
    Settled,
    /// Seize was clamped to the borrower's remaining collateral.
    Partial { requested_seize: Decimal },
    Voided { reason: LiquidationStaleError },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationOutcome {
    pub request_id: RequestId,
    pub liquidator: Address,
    pub borrower: Address,
    pub collateral: PoolId,
    pub requested_repay: Decimal,
    pub applied_repay: Decimal,
    pub refunded: Decimal,
    pub seized_shares: Decimal,
    pub status: LiquidationStatus,
}

/// Per-type totals as accumulated during collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTotals {
    pub deposit: Decimal,
    pub withdraw: Decimal,
    pub borrow: Decimal,
    pub repay: Decimal,
    pub liquidation_repay: Decimal,
}

/// The one processed-batch record emitted per pool per round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRecord {
    pub round: RoundId,
    pub pool: PoolId,
    pub epoch: Epoch,
    pub deposit_total: Decimal,
    pub withdraw_total: Decimal,
    pub borrow_total: Decimal,
    pub repay_total: Decimal,
    /// Totals after skipped entries and repay refunds were removed.
    pub effective: RoundTotals,
    pub exchange_rate: Decimal,
    pub net_share_delta: Decimal,
    pub net_borrow_delta: Decimal,
    pub skipped: Vec<SkippedEntry>,
    pub liquidations: Vec<LiquidationOutcome>,
    pub processed_at: DateTime<Utc>,
}

impl BatchRecord {
    /// Deterministic key for idempotent storage: hex(sha256(round | pool))[..32].
    pub fn record_key(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.round.as_u64().to_be_bytes());
        hasher.update(b"|");
        hasher.update(self.pool.as_str().as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..16])
    }
}
