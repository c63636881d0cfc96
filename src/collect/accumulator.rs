//! Conflict-free accumulator: a sharded running sum merged at the round boundary.

use crate::domain::Decimal;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use thiserror::Error;

const DEFAULT_SHARDS: usize = 16;

/// The running total would leave the representable decimal range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("accumulated total would overflow")]
pub struct AccumulatorOverflow;

/// Commutative running sum safe under concurrent `add`.
///
/// Each `add` lands on one shard chosen round-robin, so concurrent callers
/// rarely contend on the same lock. `get` merges the shards; it is only
/// meaningful once collection for the round has closed.
#[derive(Debug)]
pub struct Accumulator {
    shards: Box<[Mutex<Decimal>]>,
    next: AtomicUsize,
    count: AtomicU64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(Decimal::zero()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            next: AtomicUsize::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Add `delta` unless the merged total would overflow.
    ///
    /// The merged check and the shard update are not one atomic step, so
    /// racing adds near the top of the range can still push the merged
    /// total past it; `get` reports that case instead of panicking.
    pub fn add(&self, delta: Decimal) -> Result<(), AccumulatorOverflow> {
        if !self.can_add(delta) {
            return Err(AccumulatorOverflow);
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.shards.len();
        {
            let mut shard = self.shards[idx].lock();
            *shard = shard.checked_add(delta).ok_or(AccumulatorOverflow)?;
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Whether `delta` fits on top of the current merged total.
    pub fn can_add(&self, delta: Decimal) -> bool {
        self.get()
            .and_then(|total| total.checked_add(delta))
            .is_some()
    }

    /// Total since the last reset; `None` if the shards no longer merge.
    pub fn get(&self) -> Option<Decimal> {
        self.shards
            .iter()
            .try_fold(Decimal::zero(), |acc, shard| acc.checked_add(*shard.lock()))
    }

    /// Number of contributions since the last reset.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        for shard in self.shards.iter() {
            *shard.lock() = Decimal::zero();
        }
        self.count.store(0, Ordering::Relaxed);
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_add_get_reset() {
        let acc = Accumulator::with_shards(4);
        acc.add(d("1.5")).unwrap();
        acc.add(d("2.25")).unwrap();
        acc.add(d("0.25")).unwrap();
        assert_eq!(acc.get(), Some(d("4")));
        assert_eq!(acc.count(), 3);

        acc.reset();
        assert_eq!(acc.get(), Some(Decimal::zero()));
        assert_eq!(acc.count(), 0);
    }

    #[test]
    fn test_single_shard() {
        let acc = Accumulator::with_shards(0);
        acc.add(d("7")).unwrap();
        assert_eq!(acc.get(), Some(d("7")));
    }

    #[test]
    fn test_overflowing_add_is_rejected_and_total_kept() {
        // Two halves of the range land on different shards, so only the
        // merged check can catch the second one.
        let acc = Accumulator::with_shards(4);
        let big = Decimal::max_value() - d("1");
        acc.add(big).unwrap();
        assert!(!acc.can_add(big));
        assert_eq!(acc.add(big), Err(AccumulatorOverflow));
        assert_eq!(acc.count(), 1);
        assert_eq!(acc.get(), Some(big));

        acc.add(d("1")).unwrap();
        assert_eq!(acc.get(), Some(Decimal::max_value()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_are_not_lost() {
        let acc = Arc::new(Accumulator::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let acc = acc.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    acc.add(d("0.01")).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(acc.get(), Some(d("40")));
        assert_eq!(acc.count(), 4000);
    }

    proptest! {
        #[test]
        fn prop_total_independent_of_order(
            mut cents in proptest::collection::vec(0i64..1_000_000, 0..64),
            shards in 1usize..8,
        ) {
            let forward = Accumulator::with_shards(shards);
            for c in &cents {
                forward.add(Decimal::new(rust_decimal::Decimal::new(*c, 2))).unwrap();
            }

            cents.reverse();
            let backward = Accumulator::with_shards(shards + 1);
            for c in &cents {
                backward.add(Decimal::new(rust_decimal::Decimal::new(*c, 2))).unwrap();
            }

            prop_assert_eq!(forward.get(), backward.get());
        }
    }
}
