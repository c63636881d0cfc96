//! Operation requests collected during a round.

use crate::domain::{Address, Decimal, PoolId, RequestId};
use serde::{Deserialize, Serialize};

/// Kind of operation submitted against a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OpType {
    /// Supply underlying, receive shares.
    Deposit,
    /// Redeem shares for underlying. Amount is denominated in shares.
    Withdraw,
    /// Borrow underlying against collateral held elsewhere.
    Borrow,
    /// Repay own debt.
    Repay,
    /// Repay `borrower`'s debt in this pool and seize shares in `collateral`.
    Liquidate {
        borrower: Address,
        collateral: PoolId,
    },
}

impl OpType {
    /// True when the submitter's funds must be escrowed at submission.
    pub fn requires_custody(&self) -> bool {
        matches!(self, OpType::Deposit | OpType::Repay | OpType::Liquidate { .. })
    }

    pub fn kind(&self) -> OpKind {
        match self {
            OpType::Deposit => OpKind::Deposit,
            OpType::Withdraw => OpKind::Withdraw,
            OpType::Borrow => OpKind::Borrow,
            OpType::Repay => OpKind::Repay,
            OpType::Liquidate { .. } => OpKind::Liquidate,
        }
    }
}

/// Fieldless discriminant of [`OpType`], used to index logs and accumulators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Deposit,
    Withdraw,
    Borrow,
    Repay,
    Liquidate,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OpKind::Deposit => "deposit",
            OpKind::Withdraw => "withdraw",
            OpKind::Borrow => "borrow",
            OpKind::Repay => "repay",
            OpKind::Liquidate => "liquidate",
        };
        write!(f, "{}", s)
    }
}

/// A single accepted operation. Immutable once appended to a round log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub id: RequestId,
    /// Per-pool append sequence within the round.
    pub seq: u64,
    pub submitter: Address,
    pub amount: Decimal,
    pub op: OpType,
}

impl OperationRequest {
    pub fn new(seq: u64, submitter: Address, amount: Decimal, op: OpType) -> Self {
        Self {
            id: RequestId::new_v4(),
            seq,
            submitter,
            amount,
            op,
        }
    }

    /// Borrower and collateral pool for liquidation requests.
    pub fn liquidation_target(&self) -> Option<(&Address, &PoolId)> {
        match &self.op {
            OpType::Liquidate {
                borrower,
                collateral,
            } => Some((borrower, collateral)),
            _ => None,
        }
    }
}
