//! One processing job: a single pool's detached round, run to completion.

use super::LedgerRegistry;
use crate::collect::{AccumulatorOverflow, PoolRoundState, RoundLogs};
use crate::domain::{BatchRecord, Decimal, Epoch, LiquidationStatus, PoolId, RoundId};
use crate::engine::{AccrualError, LiquidationProcessor, NettingProcessor};
use crate::external::Custody;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};

/// Fatal, pool-scoped job failure. The pool's ledger was not mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error(transparent)]
    Accrual(#[from] AccrualError),
    #[error("round totals overflow: {0}")]
    TotalOverflow(#[from] AccumulatorOverflow),
    #[error("pool {0} has no ledger")]
    UnknownPool(PoolId),
    #[error("job panicked")]
    Panicked,
}

/// A pool whose round aborted, with the escrow handed back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortedPool {
    pub pool: PoolId,
    pub error: String,
    pub refunded: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolOutcome {
    Processed(BatchRecord),
    Aborted(AbortedPool),
}

/// Collaborators shared by every job.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub ledgers: Arc<LedgerRegistry>,
    pub netting: NettingProcessor,
    pub liquidation: LiquidationProcessor,
    pub custody: Arc<dyn Custody>,
}

#[derive(Debug, Clone)]
pub struct PoolJob {
    pub pool: PoolId,
    pub round: RoundId,
    pub epoch: Epoch,
    pub state: Arc<PoolRoundState>,
}

impl PoolJob {
    /// Accrue, net, liquidate and build the round's batch record.
    ///
    /// Locks the pool's ledger together with every collateral ledger its
    /// liquidation entries reference, in pool-id order.
    pub async fn run(self, ctx: &JobContext) -> PoolOutcome {
        // The state keeps its logs until the plan is done; anything that
        // fails before then can still hand the whole escrow back.
        let logs = self.state.logs();
        let totals = match self.state.totals() {
            Ok(totals) => totals,
            Err(e) => return self.abort(ctx, &logs, e.into()).await,
        };

        let mut locked = logs.collateral_pools();
        locked.push(self.pool.clone());
        let mut guards = ctx.ledgers.lock_many(&locked).await;

        let Some(mut ledger) = guards.remove(&self.pool) else {
            drop(guards);
            return self
                .abort(ctx, &logs, JobError::UnknownPool(self.pool.clone()))
                .await;
        };

        let prepared = match ctx
            .netting
            .prepare(&self.pool, &mut ledger, &totals, &logs, self.epoch)
            .await
        {
            Ok(prepared) => prepared,
            Err(e) => {
                drop(ledger);
                drop(guards);
                return self.abort(ctx, &logs, JobError::Accrual(e)).await;
            }
        };

        // Past this point the escrow is the ledger's.
        self.state.drain_logs();
        let summary = ctx
            .netting
            .apply(&self.pool, &mut ledger, &totals, prepared)
            .await;

        let liquidations = ctx
            .liquidation
            .process(
                &self.pool,
                &mut ledger,
                &mut guards,
                &logs.liquidations,
                self.epoch,
            )
            .await;
        drop(guards);
        drop(ledger);

        if !summary.skipped.is_empty() {
            warn!(pool = %self.pool, round = %self.round, skipped = summary.skipped.len(), "entries skipped");
        }
        let voided = liquidations
            .iter()
            .filter(|l| matches!(l.status, LiquidationStatus::Voided { .. }))
            .count();
        if voided > 0 {
            warn!(pool = %self.pool, round = %self.round, voided, "liquidations voided");
        }

        let mut effective = summary.effective;
        effective.liquidation_repay = liquidations.iter().map(|l| l.applied_repay).sum();

        PoolOutcome::Processed(BatchRecord {
            round: self.round,
            pool: self.pool,
            epoch: self.epoch,
            deposit_total: totals.deposit,
            withdraw_total: totals.withdraw,
            borrow_total: totals.borrow,
            repay_total: totals.repay,
            effective,
            exchange_rate: summary.exchange_rate,
            net_share_delta: summary.net_share_delta,
            net_borrow_delta: summary.net_borrow_delta,
            skipped: summary.skipped,
            liquidations,
            processed_at: Utc::now(),
        })
    }

    /// Return every escrowed amount of the round to its submitter.
    async fn abort(
        &self,
        ctx: &JobContext,
        logs: &RoundLogs,
        error: JobError,
    ) -> PoolOutcome {
        let refunded = refund_escrow(ctx.custody.as_ref(), &self.pool, logs).await;
        error!(pool = %self.pool, round = %self.round, %error, %refunded, "pool round aborted");
        PoolOutcome::Aborted(AbortedPool {
            pool: self.pool.clone(),
            error: error.to_string(),
            refunded,
        })
    }
}

/// Push every escrowed amount in `logs` back to its submitter.
pub(crate) async fn refund_escrow(custody: &dyn Custody, pool: &PoolId, logs: &RoundLogs) -> Decimal {
    let mut refunded = Decimal::zero();
    for request in logs.escrowed() {
        custody.push(pool, &request.submitter, request.amount).await;
        refunded = refunded.saturating_add(request.amount);
    }
    refunded
}
