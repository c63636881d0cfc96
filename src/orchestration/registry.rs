//! Explicit registry of pool ledgers, passed by reference into jobs.

use crate::domain::{Epoch, PoolId, PoolLedgerState, PoolParams};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub type SharedLedger = Arc<Mutex<PoolLedgerState>>;

#[derive(Debug, Default)]
pub struct LedgerRegistry {
    pools: DashMap<PoolId, SharedLedger>,
}

impl LedgerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool with an empty ledger whose accrual starts at `epoch`.
    /// Returns false if it already exists.
    pub fn register(&self, pool: PoolId, params: PoolParams, epoch: Epoch) -> bool {
        if self.pools.contains_key(&pool) {
            return false;
        }
        self.pools.entry(pool).or_insert_with(|| {
            let mut ledger = PoolLedgerState::new(params);
            ledger.accrual_epoch = epoch;
            Arc::new(Mutex::new(ledger))
        });
        true
    }

    /// Register a pool with pre-existing ledger state (restored or seeded).
    pub fn insert(&self, pool: PoolId, ledger: PoolLedgerState) {
        self.pools.insert(pool, Arc::new(Mutex::new(ledger)));
    }

    pub fn contains(&self, pool: &PoolId) -> bool {
        self.pools.contains_key(pool)
    }

    pub fn get(&self, pool: &PoolId) -> Option<SharedLedger> {
        self.pools.get(pool).map(|l| l.value().clone())
    }

    pub fn pool_ids(&self) -> Vec<PoolId> {
        let mut ids: Vec<PoolId> = self.pools.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Copy of a pool's ledger state.
    pub async fn snapshot(&self, pool: &PoolId) -> Option<PoolLedgerState> {
        let ledger = self.get(pool)?;
        let guard = ledger.lock().await;
        Some(guard.clone())
    }

    /// Lock several ledgers in pool-id order so concurrent jobs cannot deadlock.
    ///
    /// Unknown pools are left out of the returned map.
    pub async fn lock_many(
        &self,
        pools: &[PoolId],
    ) -> BTreeMap<PoolId, OwnedMutexGuard<PoolLedgerState>> {
        let mut ordered: Vec<&PoolId> = pools.iter().collect();
        ordered.sort();
        ordered.dedup();

        let mut guards = BTreeMap::new();
        for pool in ordered {
            if let Some(ledger) = self.get(pool) {
                guards.insert(pool.clone(), ledger.lock_owned().await);
            }
        }
        guards
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Address, Decimal, Epoch};
    use crate::engine::{accrue_once, AccrualOutcome};
    use crate::external::LinearRateModel;

    #[test]
    fn test_register_once() {
        let registry = LedgerRegistry::new();
        let params = PoolParams::default();
        assert!(registry.register(PoolId::new("USDC"), params.clone(), Epoch::new(1)));
        assert!(!registry.register(PoolId::new("USDC"), params, Epoch::new(1)));
        assert!(registry.contains(&PoolId::new("USDC")));
        assert!(!registry.contains(&PoolId::new("ETH")));
    }

    #[test]
    fn test_insert_seeds_existing_state() {
        let registry = LedgerRegistry::new();
        let mut seeded = PoolLedgerState::new(PoolParams::default());
        seeded.total_supply = Decimal::from_units(10);
        registry.insert(PoolId::new("ETH"), seeded.clone());

        let snapshot = tokio_test::block_on(registry.snapshot(&PoolId::new("ETH")));
        assert_eq!(snapshot, Some(seeded));
        assert!(tokio_test::block_on(registry.snapshot(&PoolId::new("DOGE"))).is_none());
        assert_eq!(registry.pool_ids(), vec![PoolId::new("ETH")]);
    }

    #[tokio::test]
    async fn test_lock_many_sorted_and_deduplicated() {
        let registry = LedgerRegistry::new();
        registry.register(PoolId::new("USDC"), PoolParams::default(), Epoch::new(1));
        registry.register(PoolId::new("ETH"), PoolParams::default(), Epoch::new(1));

        let guards = registry
            .lock_many(&[
                PoolId::new("USDC"),
                PoolId::new("ETH"),
                PoolId::new("USDC"),
                PoolId::new("DOGE"),
            ])
            .await;
        let keys: Vec<&PoolId> = guards.keys().collect();
        assert_eq!(keys, vec![&PoolId::new("ETH"), &PoolId::new("USDC")]);
    }

    #[tokio::test]
    async fn test_snapshot_reflects_mutation() {
        let registry = LedgerRegistry::new();
        let usdc = PoolId::new("USDC");
        registry.register(usdc.clone(), PoolParams::default(), Epoch::new(1));
        {
            let ledger = registry.get(&usdc).unwrap();
            ledger.lock().await.cash = Decimal::from_units(42);
        }
        let snapshot = registry.snapshot(&usdc).await.unwrap();
        assert_eq!(snapshot.cash, Decimal::from_units(42));
    }

    #[tokio::test]
    async fn test_first_accrual_counts_from_registration() {
        let registry = LedgerRegistry::new();
        let usdc = PoolId::new("USDC");
        let start = Epoch::new(1_700_000_000);
        registry.register(usdc.clone(), PoolParams::default(), start);

        let ledger = registry.get(&usdc).unwrap();
        let mut ledger = ledger.lock().await;
        assert_eq!(ledger.accrual_epoch, start);
        ledger.cash = Decimal::from_units(1000);
        ledger.total_borrows = Decimal::from_units(1000);
        ledger.set_owed(&Address::new("0xbob"), Decimal::from_units(1000));

        let rate = Decimal::from_str_canonical("0.0001").unwrap();
        let model = LinearRateModel::flat(rate);
        let outcome =
            accrue_once(&mut ledger, Epoch::new(1_700_000_001), &model, Decimal::one()).unwrap();
        assert_eq!(
            outcome,
            AccrualOutcome::Applied {
                rate,
                elapsed: 1,
                interest: Decimal::from_str_canonical("0.1").unwrap(),
            }
        );
        assert_eq!(ledger.borrow_index, Decimal::from_str_canonical("1.0001").unwrap());
    }
}
