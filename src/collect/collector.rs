//! Request collector: concurrent submission into per-pool round logs.

use super::{ActivePoolSet, PoolRoundState};
use crate::domain::{Address, Decimal, OpType, PoolId, RequestId};
use crate::external::{Custody, CustodyError};
use crate::orchestration::LedgerRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Submit-time validation failure. Nothing was escrowed or appended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown pool: {0}")]
    InvalidPool(PoolId),
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("unknown collateral pool: {0}")]
    InvalidCollateralPool(PoolId),
    #[error("liquidator cannot liquidate their own position")]
    SelfLiquidation,
    #[error("amount {0} would overflow the round total")]
    TotalOverflow(Decimal),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("insufficient funds: {0}")]
    InsufficientFunds(#[from] CustodyError),
}

/// Accepts operation submissions from arbitrarily many concurrent callers.
#[derive(Debug)]
pub struct RequestCollector {
    ledgers: Arc<LedgerRegistry>,
    custody: Arc<dyn Custody>,
    rounds: DashMap<PoolId, Arc<PoolRoundState>>,
    active: ActivePoolSet,
}

impl RequestCollector {
    pub fn new(ledgers: Arc<LedgerRegistry>, custody: Arc<dyn Custody>) -> Self {
        Self {
            ledgers,
            custody,
            rounds: DashMap::new(),
            active: ActivePoolSet::new(),
        }
    }

    /// Validate, escrow if required, then append to the pool's round log.
    pub async fn submit(
        &self,
        pool: &PoolId,
        op: OpType,
        submitter: &Address,
        amount: Decimal,
    ) -> Result<RequestId, SubmitError> {
        self.validate(pool, &op, submitter, amount)?;

        let kind = op.kind();
        let escrow = op.requires_custody();
        if let Some(state) = self.rounds.get(pool) {
            if !state.can_accept(kind, amount) {
                return Err(ValidationError::TotalOverflow(amount).into());
            }
        }

        if escrow {
            self.custody.pull(pool, submitter, amount).await?;
        }

        // The shard guard is held across the append so `take_round` cannot
        // detach the state while this entry is half-written.
        let appended = match self.rounds.get(pool) {
            Some(state) => state.append(submitter.clone(), amount, op),
            None => self
                .rounds
                .entry(pool.clone())
                .or_default()
                .append(submitter.clone(), amount, op),
        };
        let id = match appended {
            Ok(id) => id,
            Err(_) => {
                // Lost a race for the last of the range after escrowing.
                if escrow {
                    self.custody.push(pool, submitter, amount).await;
                }
                return Err(ValidationError::TotalOverflow(amount).into());
            }
        };
        self.active.mark(pool);

        debug!(%pool, %submitter, %amount, op = %kind, request_id = %id, "request accepted");
        Ok(id)
    }

    fn validate(
        &self,
        pool: &PoolId,
        op: &OpType,
        submitter: &Address,
        amount: Decimal,
    ) -> Result<(), ValidationError> {
        if !self.ledgers.contains(pool) {
            return Err(ValidationError::InvalidPool(pool.clone()));
        }
        if !amount.is_positive() {
            return Err(ValidationError::NonPositiveAmount(amount));
        }
        if let OpType::Liquidate {
            borrower,
            collateral,
        } = op
        {
            if !self.ledgers.contains(collateral) {
                return Err(ValidationError::InvalidCollateralPool(collateral.clone()));
            }
            if borrower == submitter {
                return Err(ValidationError::SelfLiquidation);
            }
        }
        Ok(())
    }

    pub fn active(&self) -> &ActivePoolSet {
        &self.active
    }

    /// Detach a pool's round state for processing.
    ///
    /// Waits for in-flight appends to the pool; later submissions start a
    /// fresh state for the next round.
    pub fn take_round(&self, pool: &PoolId) -> Option<Arc<PoolRoundState>> {
        self.rounds.remove(pool).map(|(_, state)| state)
    }

    /// Number of requests pending for a pool in the open round.
    pub fn pending(&self, pool: &PoolId) -> u64 {
        self.rounds.get(pool).map(|s| s.len()).unwrap_or(0)
    }

    pub fn custody(&self) -> &Arc<dyn Custody> {
        &self.custody
    }
}
