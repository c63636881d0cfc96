//! Netting pass: one aggregate update per field, then per-account replay.
//!
//! The pass runs in three steps against a single locked ledger:
//!
//! 1. **Plan.** Every log entry is checked against scratch balances and
//!    scratch cash, in append order per type, before anything is written.
//!    Entries that cannot be honored become [`SkippedEntry`] values.
//! 2. **Aggregate.** `total_supply`, `total_borrows` and `cash` each change
//!    exactly once, from the round totals minus what the plan rejected.
//! 3. **Replay.** Planned per-account effects are written and custody
//!    payouts (withdrawals, borrows, refunds) are pushed.

use super::accrual::{accrue_once, AccrualError, AccrualOutcome};
use crate::collect::RoundLogs;
use crate::domain::{
    amount_from_shares, shares_from_amount, Address, Decimal, Epoch, OpKind, OperationRequest,
    PerAccountError, PoolId, PoolLedgerState, RoundTotals, SkippedEntry,
};
use crate::external::{Custody, InterestRateModel, RiskEngine};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// What the netting pass did to one pool in one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NettingSummary {
    pub accrual: AccrualOutcome,
    /// Exchange rate snapshot used for every share conversion in the pass.
    pub exchange_rate: Decimal,
    pub effective: RoundTotals,
    pub minted_shares: Decimal,
    pub net_share_delta: Decimal,
    pub net_borrow_delta: Decimal,
    pub skipped: Vec<SkippedEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Effect {
    Mint { shares: Decimal },
    Burn { shares: Decimal, underlying: Decimal },
    Borrow { amount: Decimal },
    Repay { applied: Decimal, refund: Decimal },
}

#[derive(Debug, Clone)]
struct Planned<'a> {
    request: &'a OperationRequest,
    effect: Effect,
}

/// Result of the validation pre-pass. Nothing in here has touched the ledger.
#[derive(Debug, Default)]
struct Plan<'a> {
    accepted: Vec<Planned<'a>>,
    skipped: Vec<(SkippedEntry, Decimal)>,
    minted: Decimal,
    released: Decimal,
    rejected: RoundTotals,
    repay_refunds: Decimal,
}

impl<'a> Plan<'a> {
    /// Record a rejection. `refund` is what goes back to the submitter.
    fn skip(&mut self, request: &'a OperationRequest, error: PerAccountError, refund: Decimal) {
        let kind = request.op.kind();
        match kind {
            OpKind::Deposit => self.rejected.deposit += request.amount,
            OpKind::Withdraw => self.rejected.withdraw += request.amount,
            OpKind::Borrow => self.rejected.borrow += request.amount,
            OpKind::Repay => self.rejected.repay += request.amount,
            OpKind::Liquidate => self.rejected.liquidation_repay += request.amount,
        }
        self.skipped.push((
            SkippedEntry {
                request_id: request.id,
                op: kind,
                account: request.submitter.clone(),
                error,
            },
            refund,
        ));
    }
}

/// A planned round borrowing the logs it was planned from.
#[derive(Debug)]
pub struct PreparedRound<'a> {
    accrual: AccrualOutcome,
    exchange_rate: Decimal,
    plan: Plan<'a>,
}

/// Scratch view of balances that the plan consumes as it accepts entries.
struct Scratch<'l> {
    ledger: &'l PoolLedgerState,
    shares: HashMap<Address, Decimal>,
    owed: HashMap<Address, Decimal>,
    cash: Decimal,
}

impl<'l> Scratch<'l> {
    fn new(ledger: &'l PoolLedgerState) -> Self {
        Self {
            ledger,
            shares: HashMap::new(),
            owed: HashMap::new(),
            cash: ledger.cash,
        }
    }

    fn shares_mut(&mut self, account: &Address) -> &mut Decimal {
        let ledger = self.ledger;
        self.shares
            .entry(account.clone())
            .or_insert_with(|| ledger.share_balance(account))
    }

    fn owed_mut(&mut self, account: &Address) -> &mut Decimal {
        let ledger = self.ledger;
        self.owed
            .entry(account.clone())
            .or_insert_with(|| ledger.owed(account))
    }
}

/// Distribute `total` share units across entries proportionally to their
/// exact (untruncated) share values, largest remainder first.
///
/// The returned allocations always sum to `total` when `exact` is non-empty.
/// Ties on the remainder go to the earlier entry.
pub fn allocate_shares(total: Decimal, exact: &[Decimal]) -> Vec<Decimal> {
    if exact.is_empty() {
        return Vec::new();
    }
    let unit = Decimal::share_unit();
    let mut alloc: Vec<Decimal> = exact.iter().map(|e| e.trunc_scale()).collect();
    let mut residual = total - alloc.iter().sum::<Decimal>();

    let mut order: Vec<usize> = (0..exact.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = exact[a] - alloc[a];
        let rb = exact[b] - alloc[b];
        rb.cmp(&ra).then(a.cmp(&b))
    });

    if residual.is_positive() {
        let count = Decimal::from_units(exact.len() as i64);
        let per_entry = (residual / count).trunc_scale();
        if per_entry >= unit {
            for a in alloc.iter_mut() {
                *a += per_entry;
            }
            residual -= per_entry * count;
        }
        for &i in &order {
            if residual < unit {
                break;
            }
            alloc[i] += unit;
            residual -= unit;
        }
    }

    while residual.is_negative() {
        let mut progressed = false;
        for &i in order.iter().rev() {
            if !residual.is_negative() {
                break;
            }
            let take = Ord::min(unit, -residual);
            if alloc[i] >= take {
                alloc[i] -= take;
                residual += take;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    alloc
}

/// Runs accrual and the netting pass for a pool's detached round.
#[derive(Debug, Clone)]
pub struct NettingProcessor {
    rate_model: Arc<dyn InterestRateModel>,
    risk: Arc<dyn RiskEngine>,
    custody: Arc<dyn Custody>,
    max_borrow_rate: Decimal,
}

impl NettingProcessor {
    pub fn new(
        rate_model: Arc<dyn InterestRateModel>,
        risk: Arc<dyn RiskEngine>,
        custody: Arc<dyn Custody>,
        max_borrow_rate: Decimal,
    ) -> Self {
        Self {
            rate_model,
            risk,
            custody,
            max_borrow_rate,
        }
    }

    /// Accrue interest on `ledger` up to `epoch`, at most once per epoch.
    pub fn accrue(
        &self,
        ledger: &mut PoolLedgerState,
        epoch: Epoch,
    ) -> Result<AccrualOutcome, AccrualError> {
        accrue_once(ledger, epoch, self.rate_model.as_ref(), self.max_borrow_rate)
    }

    /// Accrue, then net the round's deposits, withdrawals, borrows and repays.
    ///
    /// An accrual error is returned before the ledger is touched; the caller
    /// owns refunding the round's escrow in that case.
    pub async fn process(
        &self,
        pool: &PoolId,
        ledger: &mut PoolLedgerState,
        totals: &RoundTotals,
        logs: &RoundLogs,
        epoch: Epoch,
    ) -> Result<NettingSummary, AccrualError> {
        let prepared = self.prepare(pool, ledger, totals, logs, epoch).await?;
        Ok(self.apply(pool, ledger, totals, prepared).await)
    }

    /// Accrue and plan. Beyond accrual nothing is written and no custody
    /// payout has been pushed when this returns.
    pub async fn prepare<'a>(
        &self,
        pool: &PoolId,
        ledger: &mut PoolLedgerState,
        totals: &RoundTotals,
        logs: &'a RoundLogs,
        epoch: Epoch,
    ) -> Result<PreparedRound<'a>, AccrualError> {
        let accrual = self.accrue(ledger, epoch)?;
        let exchange_rate = ledger.exchange_rate();

        check_log_totals(pool, totals, logs);

        let plan = self.plan(pool, ledger, totals, logs, exchange_rate).await;
        Ok(PreparedRound {
            accrual,
            exchange_rate,
            plan,
        })
    }

    /// Write the aggregates once, then replay per-account effects and payouts.
    pub async fn apply(
        &self,
        pool: &PoolId,
        ledger: &mut PoolLedgerState,
        totals: &RoundTotals,
        prepared: PreparedRound<'_>,
    ) -> NettingSummary {
        let PreparedRound {
            accrual,
            exchange_rate,
            plan,
        } = prepared;

        let effective = RoundTotals {
            deposit: totals.deposit - plan.rejected.deposit,
            withdraw: totals.withdraw - plan.rejected.withdraw,
            borrow: totals.borrow - plan.rejected.borrow,
            repay: totals.repay - plan.rejected.repay - plan.repay_refunds,
            liquidation_repay: Decimal::zero(),
        };

        let net_share_delta = plan.minted - effective.withdraw;
        let net_borrow_delta = effective.borrow - effective.repay;

        ledger.total_supply += net_share_delta;
        ledger.total_borrows = (ledger.total_borrows + net_borrow_delta).floor_zero();
        ledger.cash = ledger.cash + effective.deposit - plan.released - effective.borrow
            + effective.repay;

        debug!(
            %pool,
            %exchange_rate,
            %net_share_delta,
            %net_borrow_delta,
            skipped = plan.skipped.len(),
            "aggregates updated"
        );

        self.replay(pool, ledger, &plan).await;

        let minted_shares = plan.minted;
        let skipped = plan.skipped.into_iter().map(|(entry, _)| entry).collect();

        NettingSummary {
            accrual,
            exchange_rate,
            effective,
            minted_shares,
            net_share_delta,
            net_borrow_delta,
            skipped,
        }
    }

    async fn plan<'a>(
        &self,
        pool: &PoolId,
        ledger: &PoolLedgerState,
        totals: &RoundTotals,
        logs: &'a RoundLogs,
        exchange_rate: Decimal,
    ) -> Plan<'a> {
        let mut plan = Plan::default();
        let mut scratch = Scratch::new(ledger);
        let unit = Decimal::share_unit();

        // Deposits: reject dust, then split the aggregate mint exactly.
        let mut minting: Vec<(&OperationRequest, Decimal)> = Vec::new();
        for request in &logs.deposits {
            let exact = request
                .amount
                .checked_div(exchange_rate)
                .unwrap_or_default();
            if exact < unit {
                plan.skip(
                    request,
                    PerAccountError::DepositBelowShareUnit {
                        amount: request.amount,
                    },
                    request.amount,
                );
            } else {
                minting.push((request, exact));
            }
        }
        let deposit_effective = totals.deposit - plan.rejected.deposit;
        let mint_total = shares_from_amount(deposit_effective, exchange_rate);
        let exact: Vec<Decimal> = minting.iter().map(|(_, e)| *e).collect();
        let allocations = allocate_shares(mint_total, &exact);
        for ((request, _), shares) in minting.into_iter().zip(allocations) {
            *scratch.shares_mut(&request.submitter) += shares;
            plan.minted += shares;
            plan.accepted.push(Planned {
                request,
                effect: Effect::Mint { shares },
            });
        }
        scratch.cash += deposit_effective;

        for request in &logs.withdraws {
            let account = &request.submitter;
            let available = *scratch.shares_mut(account);
            if request.amount > available {
                plan.skip(
                    request,
                    PerAccountError::InsufficientShares {
                        requested: request.amount,
                        available,
                    },
                    Decimal::zero(),
                );
                continue;
            }
            let underlying = amount_from_shares(request.amount, exchange_rate);
            if underlying > scratch.cash {
                plan.skip(
                    request,
                    PerAccountError::InsufficientCash {
                        needed: underlying,
                        available: scratch.cash,
                    },
                    Decimal::zero(),
                );
                continue;
            }
            match self.risk.account_liquidity(account).await {
                Ok((_, shortfall)) if shortfall.is_positive() => {
                    plan.skip(
                        request,
                        PerAccountError::AccountShortfall { shortfall },
                        Decimal::zero(),
                    );
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    plan.skip(
                        request,
                        PerAccountError::RiskUnavailable(e.to_string()),
                        Decimal::zero(),
                    );
                    continue;
                }
            }
            *scratch.shares_mut(account) -= request.amount;
            scratch.cash -= underlying;
            plan.released += underlying;
            plan.accepted.push(Planned {
                request,
                effect: Effect::Burn {
                    shares: request.amount,
                    underlying,
                },
            });
        }

        for request in &logs.borrows {
            let account = &request.submitter;
            match self.risk.borrow_allowed(pool, account, request.amount).await {
                Ok(true) => {}
                Ok(false) => {
                    plan.skip(request, PerAccountError::BorrowNotAllowed, Decimal::zero());
                    continue;
                }
                Err(e) => {
                    plan.skip(
                        request,
                        PerAccountError::RiskUnavailable(e.to_string()),
                        Decimal::zero(),
                    );
                    continue;
                }
            }
            if request.amount > scratch.cash {
                plan.skip(
                    request,
                    PerAccountError::InsufficientCash {
                        needed: request.amount,
                        available: scratch.cash,
                    },
                    Decimal::zero(),
                );
                continue;
            }
            *scratch.owed_mut(account) += request.amount;
            scratch.cash -= request.amount;
            plan.accepted.push(Planned {
                request,
                effect: Effect::Borrow {
                    amount: request.amount,
                },
            });
        }

        for request in &logs.repays {
            let owed = scratch.owed_mut(&request.submitter);
            if !owed.is_positive() {
                plan.skip(request, PerAccountError::NothingOwed, request.amount);
                continue;
            }
            let applied = Ord::min(request.amount, *owed);
            let refund = request.amount - applied;
            *owed -= applied;
            scratch.cash += applied;
            plan.repay_refunds += refund;
            plan.accepted.push(Planned {
                request,
                effect: Effect::Repay { applied, refund },
            });
        }

        plan
    }

    async fn replay(&self, pool: &PoolId, ledger: &mut PoolLedgerState, plan: &Plan<'_>) {
        for planned in &plan.accepted {
            let account = &planned.request.submitter;
            match &planned.effect {
                Effect::Mint { shares } => ledger.credit_shares(account, *shares),
                Effect::Burn { shares, underlying } => {
                    ledger.debit_shares(account, *shares);
                    self.custody.push(pool, account, *underlying).await;
                }
                Effect::Borrow { amount } => {
                    let owed = ledger.owed(account);
                    ledger.set_owed(account, owed + *amount);
                    self.custody.push(pool, account, *amount).await;
                }
                Effect::Repay { applied, refund } => {
                    let owed = ledger.owed(account);
                    ledger.set_owed(account, (owed - *applied).floor_zero());
                    if refund.is_positive() {
                        self.custody.push(pool, account, *refund).await;
                    }
                }
            }
        }

        for (entry, refund) in &plan.skipped {
            debug!(%pool, account = %entry.account, op = %entry.op, error = %entry.error, "entry skipped");
            if refund.is_positive() {
                self.custody.push(pool, &entry.account, *refund).await;
            }
        }
    }
}

/// Accumulators and logs are fed by the same append; a mismatch is logged
/// and the per-account allocation still keeps account sums exact.
fn check_log_totals(pool: &PoolId, totals: &RoundTotals, logs: &RoundLogs) {
    let sum = |log: &[OperationRequest]| log.iter().map(|r| r.amount).sum::<Decimal>();
    let pairs = [
        ("deposit", totals.deposit, sum(&logs.deposits)),
        ("withdraw", totals.withdraw, sum(&logs.withdraws)),
        ("borrow", totals.borrow, sum(&logs.borrows)),
        ("repay", totals.repay, sum(&logs.repays)),
    ];
    for (kind, accumulated, logged) in pairs {
        if accumulated != logged {
            warn!(%pool, kind, %accumulated, %logged, "accumulator total differs from log sum");
        }
    }
}
