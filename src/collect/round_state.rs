//! Per-pool round state: operation logs plus running totals.

use super::{Accumulator, AccumulatorOverflow};
use crate::domain::{Address, Decimal, OpKind, OpType, OperationRequest, PoolId, RequestId, RoundTotals};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Logs and accumulators collected for one pool during one round.
///
/// Created lazily on the first request for the pool and detached by the
/// coordinator at dispatch.
#[derive(Debug, Default)]
pub struct PoolRoundState {
    seq: AtomicU64,
    deposits: Mutex<Vec<OperationRequest>>,
    withdraws: Mutex<Vec<OperationRequest>>,
    borrows: Mutex<Vec<OperationRequest>>,
    repays: Mutex<Vec<OperationRequest>>,
    /// Liquidation sub-logs keyed by collateral pool.
    liquidations: DashMap<PoolId, Vec<OperationRequest>>,
    deposit_total: Accumulator,
    withdraw_total: Accumulator,
    borrow_total: Accumulator,
    repay_total: Accumulator,
    liquidation_total: Accumulator,
}

/// Logs drained from a detached round state, each in append order.
#[derive(Debug, Default, Clone)]
pub struct RoundLogs {
    pub deposits: Vec<OperationRequest>,
    pub withdraws: Vec<OperationRequest>,
    pub borrows: Vec<OperationRequest>,
    pub repays: Vec<OperationRequest>,
    /// All liquidation entries merged across collateral queues.
    pub liquidations: Vec<OperationRequest>,
}

impl RoundLogs {
    /// Collateral pools referenced by liquidation entries, sorted and deduplicated.
    pub fn collateral_pools(&self) -> Vec<PoolId> {
        let mut pools: Vec<PoolId> = self
            .liquidations
            .iter()
            .filter_map(|req| req.liquidation_target().map(|(_, c)| c.clone()))
            .collect();
        pools.sort();
        pools.dedup();
        pools
    }

    /// Every request that escrowed funds at submission.
    pub fn escrowed(&self) -> impl Iterator<Item = &OperationRequest> {
        self.deposits
            .iter()
            .chain(self.repays.iter())
            .chain(self.liquidations.iter())
    }
}

impl PoolRoundState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the matching accumulator, then append the request to its log.
    ///
    /// Nothing is logged when the accumulator rejects the amount.
    pub fn append(
        &self,
        submitter: Address,
        amount: Decimal,
        op: OpType,
    ) -> Result<RequestId, AccumulatorOverflow> {
        let kind = op.kind();
        self.accumulator(kind).add(amount)?;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let request = OperationRequest::new(seq, submitter, amount, op);
        let id = request.id;

        match kind {
            OpKind::Deposit => self.deposits.lock().push(request),
            OpKind::Withdraw => self.withdraws.lock().push(request),
            OpKind::Borrow => self.borrows.lock().push(request),
            OpKind::Repay => self.repays.lock().push(request),
            OpKind::Liquidate => {
                if let Some((_, collateral)) = request.liquidation_target() {
                    let collateral = collateral.clone();
                    self.liquidations.entry(collateral).or_default().push(request);
                }
            }
        }
        Ok(id)
    }

    /// Whether a request of `kind` for `amount` still fits the round's total.
    pub fn can_accept(&self, kind: OpKind, amount: Decimal) -> bool {
        self.accumulator(kind).can_add(amount)
    }

    fn accumulator(&self, kind: OpKind) -> &Accumulator {
        match kind {
            OpKind::Deposit => &self.deposit_total,
            OpKind::Withdraw => &self.withdraw_total,
            OpKind::Borrow => &self.borrow_total,
            OpKind::Repay => &self.repay_total,
            OpKind::Liquidate => &self.liquidation_total,
        }
    }

    /// Accumulated totals. Only meaningful once the state has been detached.
    pub fn totals(&self) -> Result<RoundTotals, AccumulatorOverflow> {
        let total = |acc: &Accumulator| acc.get().ok_or(AccumulatorOverflow);
        Ok(RoundTotals {
            deposit: total(&self.deposit_total)?,
            withdraw: total(&self.withdraw_total)?,
            borrow: total(&self.borrow_total)?,
            repay: total(&self.repay_total)?,
            liquidation_repay: total(&self.liquidation_total)?,
        })
    }

    /// Number of requests appended since creation.
    pub fn len(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the logs, sorted by append sequence. The state keeps its own.
    pub fn logs(&self) -> RoundLogs {
        let sorted = |log: &Mutex<Vec<OperationRequest>>| {
            let mut v = log.lock().clone();
            v.sort_by_key(|r| r.seq);
            v
        };

        let mut liquidations: Vec<OperationRequest> = self
            .liquidations
            .iter()
            .flat_map(|queue| queue.value().clone())
            .collect();
        liquidations.sort_by_key(|r| r.seq);

        RoundLogs {
            deposits: sorted(&self.deposits),
            withdraws: sorted(&self.withdraws),
            borrows: sorted(&self.borrows),
            repays: sorted(&self.repays),
            liquidations,
        }
    }

    /// Move the logs out, sorted by append sequence.
    pub fn drain_logs(&self) -> RoundLogs {
        let sorted = |mut v: Vec<OperationRequest>| {
            v.sort_by_key(|r| r.seq);
            v
        };

        let mut liquidations = Vec::new();
        for mut queue in self.liquidations.iter_mut() {
            liquidations.append(queue.value_mut());
        }

        RoundLogs {
            deposits: sorted(std::mem::take(&mut *self.deposits.lock())),
            withdraws: sorted(std::mem::take(&mut *self.withdraws.lock())),
            borrows: sorted(std::mem::take(&mut *self.borrows.lock())),
            repays: sorted(std::mem::take(&mut *self.repays.lock())),
            liquidations: sorted(liquidations),
        }
    }

    /// Reset accumulators and drop any remaining log entries.
    pub fn clear(&self) {
        self.deposits.lock().clear();
        self.withdraws.lock().clear();
        self.borrows.lock().clear();
        self.repays.lock().clear();
        self.liquidations.clear();
        for kind in [
            OpKind::Deposit,
            OpKind::Withdraw,
            OpKind::Borrow,
            OpKind::Repay,
            OpKind::Liquidate,
        ] {
            self.accumulator(kind).reset();
        }
        self.seq.store(0, Ordering::Relaxed);
    }
}
