//! In-memory collaborator implementations for the server binary and tests.

use super::{utilization, Custody, CustodyError, InterestRateModel, PriceOracle, RiskEngine, RiskError};
use crate::domain::{Address, Decimal, PoolId};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

/// Custodian keeping user balances and escrow per pool asset.
#[derive(Debug, Default)]
pub struct InMemoryCustody {
    balances: DashMap<(PoolId, Address), Decimal>,
    /// Absent entry means unlimited allowance.
    allowances: DashMap<(PoolId, Address), Decimal>,
    escrow: DashMap<PoolId, Decimal>,
}

impl InMemoryCustody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style balance credit.
    pub fn with_balance(self, pool: &PoolId, account: &Address, amount: Decimal) -> Self {
        self.credit(pool, account, amount);
        self
    }

    pub fn credit(&self, pool: &PoolId, account: &Address, amount: Decimal) {
        *self
            .balances
            .entry((pool.clone(), account.clone()))
            .or_default() += amount;
    }

    pub fn set_allowance(&self, pool: &PoolId, account: &Address, allowance: Decimal) {
        self.allowances
            .insert((pool.clone(), account.clone()), allowance);
    }

    pub fn balance(&self, pool: &PoolId, account: &Address) -> Decimal {
        self.balances
            .get(&(pool.clone(), account.clone()))
            .map(|b| *b)
            .unwrap_or_default()
    }

    /// Funds currently held on behalf of the pool.
    pub fn escrowed(&self, pool: &PoolId) -> Decimal {
        self.escrow.get(pool).map(|e| *e).unwrap_or_default()
    }
}

#[async_trait]
impl Custody for InMemoryCustody {
    async fn pull(
        &self,
        pool: &PoolId,
        from: &Address,
        amount: Decimal,
    ) -> Result<(), CustodyError> {
        let key = (pool.clone(), from.clone());

        let mut allowance = self.allowances.get_mut(&key);
        if let Some(allowed) = allowance.as_deref() {
            if *allowed < amount {
                return Err(CustodyError::InsufficientAllowance {
                    requested: amount,
                    allowed: *allowed,
                });
            }
        }

        let mut balance = self.balances.entry(key).or_default();
        if *balance < amount {
            return Err(CustodyError::InsufficientBalance {
                requested: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        if let Some(allowed) = allowance.as_deref_mut() {
            *allowed -= amount;
        }
        drop(balance);
        drop(allowance);

        *self.escrow.entry(pool.clone()).or_default() += amount;
        Ok(())
    }

    async fn push(&self, pool: &PoolId, to: &Address, amount: Decimal) {
        if let Some(mut held) = self.escrow.get_mut(pool) {
            *held -= amount;
        }
        self.credit(pool, to, amount);
    }
}

/// Risk engine whose answers are set directly (per-account flags and figures).
#[derive(Debug, Default)]
pub struct StaticRiskEngine {
    underwater: DashSet<Address>,
    liquidity: DashMap<Address, (Decimal, Decimal)>,
    borrow_denied: DashSet<Address>,
}

impl StaticRiskEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_underwater(&self, account: &Address, underwater: bool) {
        if underwater {
            self.underwater.insert(account.clone());
        } else {
            self.underwater.remove(account);
        }
    }

    pub fn set_liquidity(&self, account: &Address, liquidity: Decimal, shortfall: Decimal) {
        self.liquidity
            .insert(account.clone(), (liquidity, shortfall));
    }

    pub fn deny_borrow(&self, account: &Address) {
        self.borrow_denied.insert(account.clone());
    }
}

#[async_trait]
impl RiskEngine for StaticRiskEngine {
    async fn is_underwater(&self, account: &Address) -> Result<bool, RiskError> {
        Ok(self.underwater.contains(account))
    }

    async fn account_liquidity(&self, account: &Address) -> Result<(Decimal, Decimal), RiskError> {
        Ok(self
            .liquidity
            .get(account)
            .map(|l| *l)
            .unwrap_or((Decimal::zero(), Decimal::zero())))
    }

    async fn borrow_allowed(
        &self,
        _pool: &PoolId,
        account: &Address,
        _amount: Decimal,
    ) -> Result<bool, RiskError> {
        Ok(!self.borrow_denied.contains(account) && !self.underwater.contains(account))
    }
}

/// `borrowRate = base + slope × utilization`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearRateModel {
    pub base: Decimal,
    pub slope: Decimal,
}

impl LinearRateModel {
    pub fn new(base: Decimal, slope: Decimal) -> Self {
        Self { base, slope }
    }

    /// Constant rate regardless of utilization.
    pub fn flat(rate: Decimal) -> Self {
        Self {
            base: rate,
            slope: Decimal::zero(),
        }
    }
}

impl InterestRateModel for LinearRateModel {
    fn borrow_rate(&self, cash: Decimal, borrows: Decimal, reserves: Decimal) -> Decimal {
        self.base + self.slope * utilization(cash, borrows, reserves)
    }

    fn supply_rate(
        &self,
        cash: Decimal,
        borrows: Decimal,
        reserves: Decimal,
        reserve_factor: Decimal,
    ) -> Decimal {
        let borrow_rate = self.borrow_rate(cash, borrows, reserves);
        utilization(cash, borrows, reserves) * borrow_rate * (Decimal::one() - reserve_factor)
    }
}

#[derive(Debug, Default)]
pub struct StaticPriceOracle {
    prices: DashMap<PoolId, Decimal>,
}

impl StaticPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(self, pool: &PoolId, price: Decimal) -> Self {
        self.set_price(pool, price);
        self
    }

    pub fn set_price(&self, pool: &PoolId, price: Decimal) {
        self.prices.insert(pool.clone(), price);
    }
}

impl PriceOracle for StaticPriceOracle {
    fn price(&self, pool: &PoolId) -> Option<Decimal> {
        self.prices.get(pool).map(|p| *p).filter(|p| p.is_positive())
    }
}
