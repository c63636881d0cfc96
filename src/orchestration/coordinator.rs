//! Round coordinator: the state machine that turns collected rounds into
//! per-pool processing jobs.

use super::job::{refund_escrow, AbortedPool, JobContext, JobError, PoolJob, PoolOutcome};
use super::{EpochClock, LedgerRegistry};
use crate::collect::{PoolRoundState, RequestCollector};
use crate::domain::{BatchRecord, Epoch, PoolId, RoundId};
use crate::engine::{LiquidationParams, LiquidationProcessor, NettingProcessor};
use crate::external::Collaborators;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    Idle,
    Collecting,
    Dispatching,
    Processing,
    Resetting,
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoundPhase::Idle => "idle",
            RoundPhase::Collecting => "collecting",
            RoundPhase::Dispatching => "dispatching",
            RoundPhase::Processing => "processing",
            RoundPhase::Resetting => "resetting",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("batch sink failed: {0}")]
    Sink(String),
    #[error("pool job failed to join: {0}")]
    Join(String),
}

/// Destination for processed-batch records.
#[async_trait]
pub trait BatchSink: Send + Sync + fmt::Debug {
    async fn record(&self, record: &BatchRecord) -> Result<(), CoordinatorError>;
}

/// Sink that keeps nothing; records are still logged by the coordinator.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl BatchSink for NoopSink {
    async fn record(&self, _record: &BatchRecord) -> Result<(), CoordinatorError> {
        Ok(())
    }
}

/// What one `flush()` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundReport {
    pub round: RoundId,
    pub epoch: Epoch,
    /// One record per processed pool, ordered by pool id.
    pub records: Vec<BatchRecord>,
    pub aborted: Vec<AbortedPool>,
}

impl RoundReport {
    pub fn record(&self, pool: &PoolId) -> Option<&BatchRecord> {
        self.records.iter().find(|r| &r.pool == pool)
    }
}

type Gate = Shared<BoxFuture<'static, ()>>;

/// Phase plus the number of rounds past dispatch, shared with the task that
/// finishes each round.
#[derive(Debug)]
struct RoundStatus {
    phase: Mutex<RoundPhase>,
    in_flight: AtomicUsize,
}

impl RoundStatus {
    fn set_phase(&self, phase: RoundPhase) {
        *self.phase.lock() = phase;
    }
}

/// Drives Idle → Dispatching → Processing → Resetting → Idle.
///
/// Collection never stops: requests submitted while a round is processing
/// land in fresh per-pool state and belong to the next round.
pub struct RoundCoordinator {
    collector: Arc<RequestCollector>,
    context: Arc<JobContext>,
    clock: Arc<dyn EpochClock>,
    sink: Arc<dyn BatchSink>,
    workers: Arc<Semaphore>,
    /// Completion of the latest dispatched job per pool.
    gates: DashMap<PoolId, Gate>,
    dispatch_lock: tokio::sync::Mutex<()>,
    round: AtomicU64,
    status: Arc<RoundStatus>,
}

impl fmt::Debug for RoundCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundCoordinator")
            .field("round", &self.current_round())
            .field("phase", &*self.status.phase.lock())
            .field("gated_pools", &self.gates.len())
            .field("available_workers", &self.workers.available_permits())
            .finish()
    }
}

impl RoundCoordinator {
    pub fn new(
        collector: Arc<RequestCollector>,
        context: JobContext,
        clock: Arc<dyn EpochClock>,
        sink: Arc<dyn BatchSink>,
        worker_pool_size: usize,
    ) -> Self {
        Self {
            collector,
            context: Arc::new(context),
            clock,
            sink,
            workers: Arc::new(Semaphore::new(worker_pool_size.max(1))),
            gates: DashMap::new(),
            dispatch_lock: tokio::sync::Mutex::new(()),
            round: AtomicU64::new(0),
            status: Arc::new(RoundStatus {
                phase: Mutex::new(RoundPhase::Idle),
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Wire a collector and job context around one set of collaborators.
    pub fn assemble(
        ledgers: Arc<LedgerRegistry>,
        collaborators: Collaborators,
        params: LiquidationParams,
        clock: Arc<dyn EpochClock>,
        sink: Arc<dyn BatchSink>,
        worker_pool_size: usize,
    ) -> Self {
        let Collaborators {
            custody,
            risk,
            rate_model,
            oracle,
        } = collaborators;
        let collector = Arc::new(RequestCollector::new(ledgers.clone(), custody.clone()));
        let netting = NettingProcessor::new(
            rate_model.clone(),
            risk.clone(),
            custody.clone(),
            params.max_borrow_rate,
        );
        let liquidation = LiquidationProcessor::new(risk, custody.clone(), oracle, rate_model, params);
        let context = JobContext {
            ledgers,
            netting,
            liquidation,
            custody,
        };
        Self::new(collector, context, clock, sink, worker_pool_size)
    }

    pub fn collector(&self) -> &Arc<RequestCollector> {
        &self.collector
    }

    pub fn ledgers(&self) -> &Arc<LedgerRegistry> {
        &self.context.ledgers
    }

    pub fn phase(&self) -> RoundPhase {
        let phase = *self.status.phase.lock();
        if phase == RoundPhase::Idle && !self.collector.active().is_empty() {
            return RoundPhase::Collecting;
        }
        phase
    }

    /// Number of the last dispatched round (zero before the first).
    pub fn current_round(&self) -> RoundId {
        RoundId(self.round.load(Ordering::SeqCst))
    }

    pub fn active_pools(&self) -> Vec<PoolId> {
        self.collector.active().snapshot()
    }

    /// Close the current round and process it.
    ///
    /// Returns `None` without side effects when no pool received a request.
    /// Dispatch of concurrent calls is serialized; a later round's job for a
    /// pool waits for the earlier round's job for that pool to finish.
    ///
    /// Once dispatched, the round runs to completion on its own task even if
    /// the returned future is dropped.
    pub async fn flush(&self) -> Option<RoundReport> {
        let (round, epoch, jobs) = {
            let _dispatch = self.dispatch_lock.lock().await;
            let pools = self.collector.active().drain();
            if pools.is_empty() {
                return None;
            }
            self.status.set_phase(RoundPhase::Dispatching);

            let round = RoundId(self.round.fetch_add(1, Ordering::SeqCst) + 1);
            let epoch = self.clock.current_epoch();
            info!(%round, %epoch, pools = pools.len(), "round dispatching");

            let mut jobs = JoinSet::new();
            for pool in pools {
                let Some(state) = self.collector.take_round(&pool) else {
                    continue;
                };
                if state.is_empty() {
                    continue;
                }

                let (done_tx, done_rx) = oneshot::channel::<()>();
                let gate: Gate = async move {
                    let _ = done_rx.await;
                }
                .boxed()
                .shared();
                let previous = self.gates.insert(pool.clone(), gate);

                let job = PoolJob {
                    pool: pool.clone(),
                    round,
                    epoch,
                    state: state.clone(),
                };
                let context = self.context.clone();
                let workers = self.workers.clone();
                jobs.spawn(async move {
                    if let Some(previous) = previous {
                        previous.await;
                    }
                    let _permit = workers.acquire_owned().await.ok();
                    let caught = AssertUnwindSafe(job.run(&context)).catch_unwind().await;
                    let outcome = match caught {
                        Ok(outcome) => outcome,
                        Err(_) => recover_panicked(&context, &pool, round, &state).await,
                    };
                    let _ = done_tx.send(());
                    (state, outcome)
                });
            }

            self.status.in_flight.fetch_add(1, Ordering::SeqCst);
            self.status.set_phase(RoundPhase::Processing);
            (round, epoch, jobs)
        };

        let finishing = tokio::spawn(finish_round(
            round,
            epoch,
            jobs,
            self.sink.clone(),
            self.status.clone(),
        ));
        match finishing.await {
            Ok(report) => Some(report),
            Err(e) => {
                let e = CoordinatorError::Join(e.to_string());
                error!(%round, error = %e, "round lost before completion");
                None
            }
        }
    }
}

/// Hand back whatever escrow a panicked job left in its round state.
async fn recover_panicked(
    context: &JobContext,
    pool: &PoolId,
    round: RoundId,
    state: &PoolRoundState,
) -> PoolOutcome {
    let leftover = state.drain_logs();
    let refunded = refund_escrow(context.custody.as_ref(), pool, &leftover).await;
    error!(%pool, %round, %refunded, "pool job panicked");
    PoolOutcome::Aborted(AbortedPool {
        pool: pool.clone(),
        error: JobError::Panicked.to_string(),
        refunded,
    })
}

/// Barrier, reset and report for one dispatched round.
async fn finish_round(
    round: RoundId,
    epoch: Epoch,
    mut jobs: JoinSet<(Arc<PoolRoundState>, PoolOutcome)>,
    sink: Arc<dyn BatchSink>,
    status: Arc<RoundStatus>,
) -> RoundReport {
    // Barrier: every job of the round finishes before state is reset.
    let mut finished = Vec::new();
    while let Some(joined) = jobs.join_next().await {
        match joined {
            Ok(done) => finished.push(done),
            Err(e) => {
                let e = CoordinatorError::Join(e.to_string());
                error!(%round, error = %e, "pool job lost");
            }
        }
    }

    status.set_phase(RoundPhase::Resetting);
    let mut records = Vec::new();
    let mut aborted = Vec::new();
    for (state, outcome) in finished {
        state.clear();
        match outcome {
            PoolOutcome::Processed(record) => {
                info!(
                    %round,
                    pool = %record.pool,
                    deposit_total = %record.deposit_total,
                    withdraw_total = %record.withdraw_total,
                    borrow_total = %record.borrow_total,
                    repay_total = %record.repay_total,
                    skipped = record.skipped.len(),
                    liquidations = record.liquidations.len(),
                    "batch processed"
                );
                if let Err(e) = sink.record(&record).await {
                    error!(%round, pool = %record.pool, error = %e, "failed to store batch record");
                }
                records.push(record);
            }
            PoolOutcome::Aborted(pool) => aborted.push(pool),
        }
    }
    records.sort_by(|a, b| a.pool.cmp(&b.pool));
    aborted.sort_by(|a, b| a.pool.cmp(&b.pool));

    if status.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
        status.set_phase(RoundPhase::Idle);
    } else {
        status.set_phase(RoundPhase::Processing);
    }
    info!(%round, processed = records.len(), aborted = aborted.len(), "round complete");

    RoundReport {
        round,
        epoch,
        records,
        aborted,
    }
}
