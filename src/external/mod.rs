//! Interfaces of the collaborators the engine depends on but does not own:
//! asset custody, risk engine, interest rate model, price oracle.

use crate::domain::{Address, Decimal, PoolId};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod memory;

pub use memory::{InMemoryCustody, LinearRateModel, StaticPriceOracle, StaticRiskEngine};

/// Holds user funds per pool asset.
///
/// `pull` moves funds from the user into escrow and can fail; `push` pays out
/// funds the custodian already holds and cannot.
#[async_trait]
pub trait Custody: Send + Sync + fmt::Debug {
    async fn pull(&self, pool: &PoolId, from: &Address, amount: Decimal)
        -> Result<(), CustodyError>;

    async fn push(&self, pool: &PoolId, to: &Address, amount: Decimal);
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CustodyError {
    #[error("insufficient allowance: requested {requested}, allowed {allowed}")]
    InsufficientAllowance { requested: Decimal, allowed: Decimal },
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },
}

/// Snapshot of prices and collateral exchange rate taken once per pool-round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeizeSnapshot {
    pub borrowed_price: Decimal,
    pub collateral_price: Decimal,
    pub collateral_exchange_rate: Decimal,
    pub liquidation_incentive: Decimal,
}

/// Cross-pool account health.
#[async_trait]
pub trait RiskEngine: Send + Sync + fmt::Debug {
    async fn is_underwater(&self, account: &Address) -> Result<bool, RiskError>;

    /// `(liquidity, shortfall)`; at most one of the two is non-zero.
    async fn account_liquidity(&self, account: &Address) -> Result<(Decimal, Decimal), RiskError>;

    async fn borrow_allowed(
        &self,
        pool: &PoolId,
        account: &Address,
        amount: Decimal,
    ) -> Result<bool, RiskError>;

    /// Collateral shares to seize for `repay` units of the borrowed asset.
    ///
    /// `repay × incentive × borrowedPrice / (collateralPrice × collateralRate)`,
    /// truncated to share scale.
    fn seize_calculation(
        &self,
        _borrowed: &PoolId,
        _collateral: &PoolId,
        repay: Decimal,
        snapshot: &SeizeSnapshot,
    ) -> Result<Decimal, RiskError> {
        let numerator = repay * snapshot.liquidation_incentive * snapshot.borrowed_price;
        let denominator = snapshot.collateral_price * snapshot.collateral_exchange_rate;
        numerator
            .checked_div(denominator)
            .map(|seize| seize.trunc_scale())
            .ok_or(RiskError::InvalidSnapshot)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RiskError {
    #[error("risk engine unavailable: {0}")]
    Unavailable(String),
    #[error("seize snapshot has a zero price or exchange rate")]
    InvalidSnapshot,
}

/// Interest rate curve. Rates are per accrual epoch.
pub trait InterestRateModel: Send + Sync + fmt::Debug {
    fn borrow_rate(&self, cash: Decimal, borrows: Decimal, reserves: Decimal) -> Decimal;

    fn supply_rate(
        &self,
        cash: Decimal,
        borrows: Decimal,
        reserves: Decimal,
        reserve_factor: Decimal,
    ) -> Decimal;
}

/// Price feed keyed by pool asset.
pub trait PriceOracle: Send + Sync + fmt::Debug {
    fn price(&self, pool: &PoolId) -> Option<Decimal>;
}

/// The external collaborators one engine instance runs against.
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub custody: Arc<dyn Custody>,
    pub risk: Arc<dyn RiskEngine>,
    pub rate_model: Arc<dyn InterestRateModel>,
    pub oracle: Arc<dyn PriceOracle>,
}

/// Utilization: `borrows / (cash + borrows − reserves)`, zero when there are no borrows.
pub fn utilization(cash: Decimal, borrows: Decimal, reserves: Decimal) -> Decimal {
    if borrows.is_zero() {
        return Decimal::zero();
    }
    borrows
        .checked_div(cash + borrows - reserves)
        .map(|u| u.floor_zero())
        .unwrap_or_default()
}
