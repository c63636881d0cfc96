use crate::domain::PoolId;
use dashmap::DashSet;

/// Pools touched since the last dispatch.
#[derive(Debug, Default)]
pub struct ActivePoolSet {
    pools: DashSet<PoolId>,
}

impl ActivePoolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, pool: &PoolId) {
        if !self.pools.contains(pool) {
            self.pools.insert(pool.clone());
        }
    }

    pub fn contains(&self, pool: &PoolId) -> bool {
        self.pools.contains(pool)
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Current members, sorted.
    pub fn snapshot(&self) -> Vec<PoolId> {
        let mut pools: Vec<PoolId> = self.pools.iter().map(|p| p.key().clone()).collect();
        pools.sort();
        pools
    }

    /// Remove and return all members, sorted.
    ///
    /// A pool marked concurrently with the drain either lands in the returned
    /// list or stays in the set for the next round.
    pub fn drain(&self) -> Vec<PoolId> {
        let pools = self.snapshot();
        for pool in &pools {
            self.pools.remove(pool);
        }
        pools
    }
}
