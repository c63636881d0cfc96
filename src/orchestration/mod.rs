//! Round orchestration: ledger registry, epoch clock, pool jobs and the
//! coordinator that dispatches them.

pub mod clock;
pub mod coordinator;
pub mod job;
pub mod registry;

pub use clock::{EpochClock, ManualEpochClock, WallClockEpochClock};
pub use coordinator::{
    BatchSink, CoordinatorError, NoopSink, RoundCoordinator, RoundPhase, RoundReport,
};
pub use job::{AbortedPool, JobContext, JobError, PoolJob, PoolOutcome};
pub use registry::{LedgerRegistry, SharedLedger};
