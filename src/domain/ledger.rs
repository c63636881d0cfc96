//! Pool ledger state and the ordinary per-account bookkeeping arithmetic.

use crate::domain::{Address, Decimal, Epoch};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Static per-pool parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolParams {
    /// Fraction of accrued interest routed to reserves.
    pub reserve_factor: Decimal,
    /// Exchange rate used while the pool has no shares outstanding.
    pub initial_exchange_rate: Decimal,
}

impl Default for PoolParams {
    fn default() -> Self {
        Self {
            reserve_factor: Decimal::zero(),
            initial_exchange_rate: Decimal::one(),
        }
    }
}

/// An account's borrow position, stored as principal plus index snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBorrow {
    pub principal: Decimal,
    pub index_snapshot: Decimal,
}

impl AccountBorrow {
    /// Amount owed at `borrow_index`: `principal × borrow_index / index_snapshot`.
    pub fn owed(&self, borrow_index: Decimal) -> Decimal {
        if self.principal.is_zero() || self.index_snapshot.is_zero() {
            return Decimal::zero();
        }
        if self.index_snapshot == borrow_index {
            return self.principal;
        }
        (self.principal * borrow_index)
            .checked_div(self.index_snapshot)
            .unwrap_or(self.principal)
    }
}

/// Aggregate and per-account state of one pool.
///
/// Mutated only by the pool's single active processing job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolLedgerState {
    pub params: PoolParams,
    pub total_supply: Decimal,
    pub total_borrows: Decimal,
    pub total_reserves: Decimal,
    pub cash: Decimal,
    pub borrow_index: Decimal,
    /// Last epoch for which interest was accrued.
    pub accrual_epoch: Epoch,
    pub shares: HashMap<Address, Decimal>,
    pub borrows: HashMap<Address, AccountBorrow>,
}

impl PoolLedgerState {
    pub fn new(params: PoolParams) -> Self {
        Self {
            params,
            total_supply: Decimal::zero(),
            total_borrows: Decimal::zero(),
            total_reserves: Decimal::zero(),
            cash: Decimal::zero(),
            borrow_index: Decimal::one(),
            accrual_epoch: Epoch::default(),
            shares: HashMap::new(),
            borrows: HashMap::new(),
        }
    }

    /// Underlying per share: `(cash + borrows − reserves) / supply`.
    pub fn exchange_rate(&self) -> Decimal {
        if self.total_supply.is_zero() {
            return self.params.initial_exchange_rate;
        }
        let underlying = self.cash + self.total_borrows - self.total_reserves;
        underlying
            .checked_div(self.total_supply)
            .filter(|rate| rate.is_positive())
            .unwrap_or(self.params.initial_exchange_rate)
    }

    pub fn share_balance(&self, account: &Address) -> Decimal {
        self.shares.get(account).copied().unwrap_or_default()
    }

    /// Current debt of `account` at the pool's borrow index.
    pub fn owed(&self, account: &Address) -> Decimal {
        self.borrows
            .get(account)
            .map(|b| b.owed(self.borrow_index))
            .unwrap_or_default()
    }

    /// Sum of all account share balances.
    pub fn sum_account_shares(&self) -> Decimal {
        self.shares.values().sum()
    }

    pub fn credit_shares(&mut self, account: &Address, shares: Decimal) {
        *self.shares.entry(account.clone()).or_default() += shares;
    }

    /// Remove shares from an account; drops the entry when it reaches zero.
    pub fn debit_shares(&mut self, account: &Address, shares: Decimal) {
        if let Some(balance) = self.shares.get_mut(account) {
            *balance -= shares;
            if balance.is_zero() {
                self.shares.remove(account);
            }
        }
    }

    /// Store a new owed amount for `account`, stamped at the current index.
    pub fn set_owed(&mut self, account: &Address, owed: Decimal) {
        if owed.is_zero() {
            self.borrows.remove(account);
            return;
        }
        self.borrows.insert(
            account.clone(),
            AccountBorrow {
                principal: owed,
                index_snapshot: self.borrow_index,
            },
        );
    }
}

/// `trunc8(amount / rate)`.
pub fn shares_from_amount(amount: Decimal, exchange_rate: Decimal) -> Decimal {
    amount
        .checked_div(exchange_rate)
        .map(|s| s.trunc_scale())
        .unwrap_or_default()
}

/// `trunc8(shares × rate)`.
pub fn amount_from_shares(shares: Decimal, exchange_rate: Decimal) -> Decimal {
    (shares * exchange_rate).trunc_scale()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_exchange_rate_empty_pool_uses_initial() {
        let ledger = PoolLedgerState::new(PoolParams {
            reserve_factor: Decimal::zero(),
            initial_exchange_rate: d("0.02"),
        });
        assert_eq!(ledger.exchange_rate(), d("0.02"));
    }

    #[test]
    fn test_exchange_rate_includes_borrows_minus_reserves() {
        let mut ledger = PoolLedgerState::new(PoolParams::default());
        ledger.total_supply = d("1000");
        ledger.cash = d("600");
        ledger.total_borrows = d("500");
        ledger.total_reserves = d("50");
        assert_eq!(ledger.exchange_rate(), d("1.05"));
    }

    #[test]
    fn test_owed_scales_with_index() {
        let borrow = AccountBorrow {
            principal: d("100"),
            index_snapshot: d("1.0"),
        };
        assert_eq!(borrow.owed(d("1.1")), d("110"));
    }

    #[test]
    fn test_share_credit_debit() {
        let mut ledger = PoolLedgerState::new(PoolParams::default());
        let a = Address::new("0xa");
        ledger.credit_shares(&a, d("10"));
        ledger.debit_shares(&a, d("4"));
        assert_eq!(ledger.share_balance(&a), d("6"));
        ledger.debit_shares(&a, d("6"));
        assert!(!ledger.shares.contains_key(&a));
    }

    #[test]
    fn test_set_owed_restamps_index() {
        let mut ledger = PoolLedgerState::new(PoolParams::default());
        ledger.borrow_index = d("1.2");
        let a = Address::new("0xa");
        ledger.set_owed(&a, d("50"));
        assert_eq!(ledger.borrows[&a].index_snapshot, d("1.2"));
        assert_eq!(ledger.owed(&a), d("50"));
        ledger.set_owed(&a, Decimal::zero());
        assert!(ledger.borrows.is_empty());
    }

    #[test]
    fn test_share_conversions_truncate() {
        assert_eq!(shares_from_amount(d("10"), d("3")), d("3.33333333"));
        assert_eq!(amount_from_shares(d("3.33333333"), d("3")), d("9.99999999"));
        assert_eq!(shares_from_amount(d("10"), Decimal::zero()), Decimal::zero());
    }
}
