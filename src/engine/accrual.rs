use crate::domain::{Decimal, Epoch, PoolLedgerState};
use crate::external::InterestRateModel;
use thiserror::Error;

/// Fatal, pool-scoped accrual failure. The ledger is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccrualError {
    #[error("borrow rate {rate} exceeds ceiling {ceiling}")]
    RateCeilingExceeded { rate: Decimal, ceiling: Decimal },
    #[error("interest computation overflowed")]
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccrualOutcome {
    Applied {
        rate: Decimal,
        elapsed: u64,
        interest: Decimal,
    },
    /// The epoch was already accrued; nothing changed.
    AlreadyApplied,
}

/// Accrue simple interest for the epochs elapsed since the ledger's marker.
///
/// Idempotent per epoch: a call with an epoch at or before the marker is a
/// no-op. All values are computed before any field is written, so an error
/// leaves the ledger exactly as it was.
pub fn accrue_once(
    ledger: &mut PoolLedgerState,
    epoch: Epoch,
    model: &dyn InterestRateModel,
    max_borrow_rate: Decimal,
) -> Result<AccrualOutcome, AccrualError> {
    if epoch <= ledger.accrual_epoch {
        return Ok(AccrualOutcome::AlreadyApplied);
    }

    let rate = model.borrow_rate(ledger.cash, ledger.total_borrows, ledger.total_reserves);
    if rate > max_borrow_rate {
        return Err(AccrualError::RateCeilingExceeded {
            rate,
            ceiling: max_borrow_rate,
        });
    }

    let elapsed = epoch.elapsed_since(ledger.accrual_epoch);
    let factor = rate
        .checked_mul(Decimal::from(rust_decimal::Decimal::from(elapsed)))
        .ok_or(AccrualError::Overflow)?;
    let interest = factor
        .checked_mul(ledger.total_borrows)
        .ok_or(AccrualError::Overflow)?;
    let reserves_added = interest
        .checked_mul(ledger.params.reserve_factor)
        .ok_or(AccrualError::Overflow)?;
    let index_added = factor
        .checked_mul(ledger.borrow_index)
        .ok_or(AccrualError::Overflow)?;

    ledger.total_borrows += interest;
    ledger.total_reserves += reserves_added;
    ledger.borrow_index += index_added;
    ledger.accrual_epoch = epoch;

    Ok(AccrualOutcome::Applied {
        rate,
        elapsed,
        interest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PoolParams;
    use crate::external::LinearRateModel;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn ledger_with_borrows() -> PoolLedgerState {
        let mut ledger = PoolLedgerState::new(PoolParams {
            reserve_factor: d("0.1"),
            initial_exchange_rate: Decimal::one(),
        });
        ledger.cash = d("500");
        ledger.total_borrows = d("1000");
        ledger.total_supply = d("1500");
        ledger.accrual_epoch = Epoch::new(10);
        ledger
    }

    #[test]
    fn test_accrue_applies_simple_interest() {
        let mut ledger = ledger_with_borrows();
        let model = LinearRateModel::flat(d("0.001"));

        let outcome = accrue_once(&mut ledger, Epoch::new(12), &model, d("0.01")).unwrap();
        assert_eq!(
            outcome,
            AccrualOutcome::Applied {
                rate: d("0.001"),
                elapsed: 2,
                interest: d("2"),
            }
        );
        assert_eq!(ledger.total_borrows, d("1002"));
        assert_eq!(ledger.total_reserves, d("0.2"));
        assert_eq!(ledger.borrow_index, d("1.002"));
        assert_eq!(ledger.accrual_epoch, Epoch::new(12));
    }

    #[test]
    fn test_accrue_twice_same_epoch_is_noop() {
        let mut ledger = ledger_with_borrows();
        let model = LinearRateModel::flat(d("0.001"));

        accrue_once(&mut ledger, Epoch::new(11), &model, d("0.01")).unwrap();
        let index_after_first = ledger.borrow_index;
        let snapshot = ledger.clone();

        let outcome = accrue_once(&mut ledger, Epoch::new(11), &model, d("0.01")).unwrap();
        assert_eq!(outcome, AccrualOutcome::AlreadyApplied);
        assert_eq!(ledger.borrow_index, index_after_first);
        assert_eq!(ledger, snapshot);
    }

    #[test]
    fn test_earlier_epoch_is_noop() {
        let mut ledger = ledger_with_borrows();
        let before = ledger.clone();
        let model = LinearRateModel::flat(d("0.001"));
        let outcome = accrue_once(&mut ledger, Epoch::new(3), &model, d("0.01")).unwrap();
        assert_eq!(outcome, AccrualOutcome::AlreadyApplied);
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_rate_above_ceiling_aborts_without_mutation() {
        let mut ledger = ledger_with_borrows();
        let before = ledger.clone();
        let model = LinearRateModel::flat(d("0.5"));

        let err = accrue_once(&mut ledger, Epoch::new(11), &model, d("0.0005")).unwrap_err();
        assert_eq!(
            err,
            AccrualError::RateCeilingExceeded {
                rate: d("0.5"),
                ceiling: d("0.0005"),
            }
        );
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_no_borrows_only_moves_marker() {
        let mut ledger = PoolLedgerState::new(PoolParams::default());
        let model = LinearRateModel::flat(d("0.001"));
        accrue_once(&mut ledger, Epoch::new(5), &model, d("0.01")).unwrap();
        assert_eq!(ledger.total_borrows, Decimal::zero());
        assert_eq!(ledger.borrow_index, d("1.005"));
        assert_eq!(ledger.accrual_epoch, Epoch::new(5));
    }
}
