use crate::domain::Epoch;
use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of the accrual epoch, read once per round.
pub trait EpochClock: Send + Sync + fmt::Debug {
    fn current_epoch(&self) -> Epoch;
}

/// Epoch advanced explicitly by the caller.
#[derive(Debug, Default)]
pub struct ManualEpochClock {
    epoch: AtomicU64,
}

impl ManualEpochClock {
    pub fn new(start: Epoch) -> Self {
        Self {
            epoch: AtomicU64::new(start.as_u64()),
        }
    }

    /// Move forward by `epochs` and return the new epoch.
    pub fn advance(&self, epochs: u64) -> Epoch {
        let next = self.epoch.fetch_add(epochs, Ordering::SeqCst) + epochs;
        Epoch::new(next)
    }

    pub fn set(&self, epoch: Epoch) {
        self.epoch.store(epoch.as_u64(), Ordering::SeqCst);
    }
}

impl EpochClock for ManualEpochClock {
    fn current_epoch(&self) -> Epoch {
        Epoch::new(self.epoch.load(Ordering::SeqCst))
    }
}

/// Wall-clock epochs: milliseconds since the Unix epoch divided by a fixed length.
#[derive(Debug, Clone, Copy)]
pub struct WallClockEpochClock {
    epoch_length_ms: u64,
}

impl WallClockEpochClock {
    pub fn new(epoch_length_ms: u64) -> Self {
        Self {
            epoch_length_ms: epoch_length_ms.max(1),
        }
    }
}

impl EpochClock for WallClockEpochClock {
    fn current_epoch(&self) -> Epoch {
        let now_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        Epoch::new(now_ms / self.epoch_length_ms)
    }
}
