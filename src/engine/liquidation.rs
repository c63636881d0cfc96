//! Liquidation pass, run after netting inside the borrowed pool's job.

use super::accrual::accrue_once;
use crate::domain::{
    Address, Decimal, Epoch, LiquidationOutcome, LiquidationStaleError, LiquidationStatus,
    OperationRequest, PoolId, PoolLedgerState,
};
use crate::external::{Custody, InterestRateModel, PriceOracle, RiskEngine, SeizeSnapshot};
use std::collections::BTreeMap;
use std::ops::DerefMut;
use std::sync::Arc;
use tracing::{debug, warn};

/// Liquidation parameters shared by every pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidationParams {
    /// Maximum fraction of a borrower's debt repayable by one entry.
    pub close_factor: Decimal,
    pub liquidation_incentive: Decimal,
    pub max_borrow_rate: Decimal,
}

impl Default for LiquidationParams {
    fn default() -> Self {
        Self {
            close_factor: Decimal::from_str_canonical("0.5").unwrap_or_default(),
            liquidation_incentive: Decimal::from_str_canonical("1.08").unwrap_or_default(),
            max_borrow_rate: Decimal::from_str_canonical("0.0005").unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LiquidationProcessor {
    risk: Arc<dyn RiskEngine>,
    custody: Arc<dyn Custody>,
    oracle: Arc<dyn PriceOracle>,
    rate_model: Arc<dyn InterestRateModel>,
    params: LiquidationParams,
}

type Snapshots = BTreeMap<PoolId, Result<SeizeSnapshot, LiquidationStaleError>>;

impl LiquidationProcessor {
    pub fn new(
        risk: Arc<dyn RiskEngine>,
        custody: Arc<dyn Custody>,
        oracle: Arc<dyn PriceOracle>,
        rate_model: Arc<dyn InterestRateModel>,
        params: LiquidationParams,
    ) -> Self {
        Self {
            risk,
            custody,
            oracle,
            rate_model,
            params,
        }
    }

    pub fn params(&self) -> &LiquidationParams {
        &self.params
    }

    /// Settle `entries` (already merged in append order) against `borrowed`.
    ///
    /// `collaterals` holds the locked ledgers of every other referenced
    /// collateral pool. Each is accrued once for `epoch` and snapshotted once
    /// before the first entry runs. An entry whose collateral pool is the
    /// borrowed pool itself uses `borrowed` for both sides.
    pub async fn process<L>(
        &self,
        pool: &PoolId,
        borrowed: &mut PoolLedgerState,
        collaterals: &mut BTreeMap<PoolId, L>,
        entries: &[OperationRequest],
        epoch: Epoch,
    ) -> Vec<LiquidationOutcome>
    where
        L: DerefMut<Target = PoolLedgerState> + Send,
    {
        if entries.is_empty() {
            return Vec::new();
        }

        let snapshots = self.snapshot(pool, borrowed, collaterals, entries, epoch);

        let mut outcomes = Vec::with_capacity(entries.len());
        for request in entries {
            let Some((borrower, collateral)) = request.liquidation_target() else {
                continue;
            };
            let outcome = match self
                .settle(pool, borrowed, collaterals, &snapshots, request, borrower, collateral)
                .await
            {
                Ok(outcome) => outcome,
                Err(reason) => {
                    debug!(%pool, liquidator = %request.submitter, %borrower, %reason, "liquidation voided");
                    self.custody
                        .push(pool, &request.submitter, request.amount)
                        .await;
                    LiquidationOutcome {
                        request_id: request.id,
                        liquidator: request.submitter.clone(),
                        borrower: borrower.clone(),
                        collateral: collateral.clone(),
                        requested_repay: request.amount,
                        applied_repay: Decimal::zero(),
                        refunded: request.amount,
                        seized_shares: Decimal::zero(),
                        status: LiquidationStatus::Voided { reason },
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Accrue each foreign collateral pool once, then capture one seize
    /// snapshot per collateral pool.
    fn snapshot<L>(
        &self,
        pool: &PoolId,
        borrowed: &PoolLedgerState,
        collaterals: &mut BTreeMap<PoolId, L>,
        entries: &[OperationRequest],
        epoch: Epoch,
    ) -> Snapshots
    where
        L: DerefMut<Target = PoolLedgerState>,
    {
        let mut referenced: Vec<&PoolId> = entries
            .iter()
            .filter_map(|r| r.liquidation_target().map(|(_, c)| c))
            .collect();
        referenced.sort();
        referenced.dedup();

        let borrowed_price = self.oracle.price(pool);
        let mut snapshots = Snapshots::new();
        for collateral in referenced {
            let rate = if collateral == pool {
                Ok(borrowed.exchange_rate())
            } else {
                match collaterals.get_mut(collateral) {
                    Some(ledger) => {
                        let ledger: &mut PoolLedgerState = ledger;
                        match accrue_once(
                            ledger,
                            epoch,
                            self.rate_model.as_ref(),
                            self.params.max_borrow_rate,
                        ) {
                            Ok(_) => Ok(ledger.exchange_rate()),
                            Err(e) => {
                                warn!(%pool, %collateral, error = %e, "collateral pool accrual failed");
                                Err(LiquidationStaleError::CollateralUnavailable(
                                    collateral.clone(),
                                ))
                            }
                        }
                    }
                    None => Err(LiquidationStaleError::CollateralUnavailable(
                        collateral.clone(),
                    )),
                }
            };

            let snapshot = rate.and_then(|collateral_exchange_rate| {
                let borrowed_price =
                    borrowed_price.ok_or_else(|| LiquidationStaleError::MissingPrice(pool.clone()))?;
                let collateral_price = self
                    .oracle
                    .price(collateral)
                    .ok_or_else(|| LiquidationStaleError::MissingPrice(collateral.clone()))?;
                Ok(SeizeSnapshot {
                    borrowed_price,
                    collateral_price,
                    collateral_exchange_rate,
                    liquidation_incentive: self.params.liquidation_incentive,
                })
            });
            snapshots.insert(collateral.clone(), snapshot);
        }
        snapshots
    }

    #[allow(clippy::too_many_arguments)]
    async fn settle<L>(
        &self,
        pool: &PoolId,
        borrowed: &mut PoolLedgerState,
        collaterals: &mut BTreeMap<PoolId, L>,
        snapshots: &Snapshots,
        request: &OperationRequest,
        borrower: &Address,
        collateral: &PoolId,
    ) -> Result<LiquidationOutcome, LiquidationStaleError>
    where
        L: DerefMut<Target = PoolLedgerState> + Send,
    {
        let snapshot = match snapshots.get(collateral) {
            Some(Ok(snapshot)) => *snapshot,
            Some(Err(reason)) => return Err(reason.clone()),
            None => return Err(LiquidationStaleError::CollateralUnavailable(collateral.clone())),
        };

        match self.risk.is_underwater(borrower).await {
            Ok(true) => {}
            Ok(false) => return Err(LiquidationStaleError::NotUnderwater),
            Err(e) => return Err(LiquidationStaleError::RiskUnavailable(e.to_string())),
        }

        let owed = borrowed.owed(borrower);
        let max_repay = (owed * self.params.close_factor).trunc_scale();
        let applied = Ord::min(request.amount, max_repay);
        if !applied.is_positive() {
            return Err(LiquidationStaleError::NoDebt);
        }

        let seize = self
            .risk
            .seize_calculation(pool, collateral, applied, &snapshot)
            .map_err(|e| LiquidationStaleError::RiskUnavailable(e.to_string()))?;

        let available = if collateral == pool {
            borrowed.share_balance(borrower)
        } else {
            collaterals
                .get(collateral)
                .map(|ledger| ledger.share_balance(borrower))
                .ok_or_else(|| LiquidationStaleError::CollateralUnavailable(collateral.clone()))?
        };
        if !available.is_positive() {
            return Err(LiquidationStaleError::NoCollateral);
        }

        let (seized, status) = if seize > available {
            (
                available,
                LiquidationStatus::Partial {
                    requested_seize: seize,
                },
            )
        } else {
            (seize, LiquidationStatus::Settled)
        };

        borrowed.set_owed(borrower, (owed - applied).floor_zero());
        borrowed.total_borrows = (borrowed.total_borrows - applied).floor_zero();
        borrowed.cash += applied;

        let liquidator = &request.submitter;
        let collateral_ledger: &mut PoolLedgerState = if collateral == pool {
            borrowed
        } else {
            collaterals
                .get_mut(collateral)
                .map(|ledger| ledger.deref_mut())
                .ok_or_else(|| LiquidationStaleError::CollateralUnavailable(collateral.clone()))?
        };
        collateral_ledger.debit_shares(borrower, seized);
        collateral_ledger.credit_shares(liquidator, seized);

        let refunded = request.amount - applied;
        if refunded.is_positive() {
            self.custody.push(pool, liquidator, refunded).await;
        }

        debug!(%pool, %liquidator, %borrower, %collateral, %applied, %seized, "liquidation settled");

        Ok(LiquidationOutcome {
            request_id: request.id,
            liquidator: liquidator.clone(),
            borrower: borrower.clone(),
            collateral: collateral.clone(),
            requested_repay: request.amount,
            applied_repay: applied,
            refunded,
            seized_shares: seized,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OpType, PoolParams};
    use crate::external::{InMemoryCustody, LinearRateModel, StaticPriceOracle, StaticRiskEngine};

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    struct Fixture {
        usdc: PoolId,
        eth: PoolId,
        custody: Arc<InMemoryCustody>,
        risk: Arc<StaticRiskEngine>,
        processor: LiquidationProcessor,
    }

    fn fixture() -> Fixture {
        let usdc = PoolId::new("USDC");
        let eth = PoolId::new("ETH");
        let custody = Arc::new(InMemoryCustody::new());
        let risk = Arc::new(StaticRiskEngine::new());
        let oracle = Arc::new(
            StaticPriceOracle::new()
                .with_price(&usdc, d("1"))
                .with_price(&eth, d("2000")),
        );
        let processor = LiquidationProcessor::new(
            risk.clone(),
            custody.clone(),
            oracle,
            Arc::new(LinearRateModel::flat(Decimal::zero())),
            LiquidationParams::default(),
        );
        Fixture {
            usdc,
            eth,
            custody,
            risk,
            processor,
        }
    }

    fn liquidate(
        seq: u64,
        liquidator: &str,
        borrower: &str,
        collateral: &PoolId,
        amount: &str,
    ) -> OperationRequest {
        OperationRequest::new(
            seq,
            Address::new(liquidator),
            d(amount),
            OpType::Liquidate {
                borrower: Address::new(borrower),
                collateral: collateral.clone(),
            },
        )
    }

    fn borrowed_ledger(borrower: &Address, owed: &str) -> PoolLedgerState {
        let mut ledger = PoolLedgerState::new(PoolParams::default());
        ledger.set_owed(borrower, d(owed));
        ledger.total_borrows = d(owed);
        ledger
    }

    fn collateral_ledger(borrower: &Address, shares: &str) -> BTreeMap<PoolId, Box<PoolLedgerState>> {
        let mut ledger = PoolLedgerState::new(PoolParams::default());
        ledger.credit_shares(borrower, d(shares));
        ledger.total_supply = d(shares);
        ledger.cash = d(shares);
        let mut map = BTreeMap::new();
        map.insert(PoolId::new("ETH"), Box::new(ledger));
        map
    }

    #[tokio::test]
    async fn test_settles_with_incentive() {
        let fx = fixture();
        let bob = Address::new("0xb");
        let liq = Address::new("0x1");
        fx.risk.set_underwater(&bob, true);
        let mut borrowed = borrowed_ledger(&bob, "2000");
        let mut collaterals = collateral_ledger(&bob, "10");

        let entries = vec![liquidate(0, "0x1", "0xb", &fx.eth, "1000")];
        let outcomes = fx
            .processor
            .process(&fx.usdc, &mut borrowed, &mut collaterals, &entries, Epoch::new(1))
            .await;

        assert_eq!(outcomes[0].status, LiquidationStatus::Settled);
        assert_eq!(outcomes[0].applied_repay, d("1000"));
        assert_eq!(outcomes[0].seized_shares, d("0.54"));
        assert_eq!(borrowed.owed(&bob), d("1000"));
        assert_eq!(borrowed.total_borrows, d("1000"));
        assert_eq!(borrowed.cash, d("1000"));
        let eth = &collaterals[&fx.eth];
        assert_eq!(eth.share_balance(&bob), d("9.46"));
        assert_eq!(eth.share_balance(&liq), d("0.54"));
    }

    #[tokio::test]
    async fn test_repay_capped_at_close_factor() {
        let fx = fixture();
        let bob = Address::new("0xb");
        let liq = Address::new("0x1");
        fx.risk.set_underwater(&bob, true);
        let mut borrowed = borrowed_ledger(&bob, "1000");
        let mut collaterals = collateral_ledger(&bob, "10");

        let entries = vec![liquidate(0, "0x1", "0xb", &fx.eth, "800")];
        let outcomes = fx
            .processor
            .process(&fx.usdc, &mut borrowed, &mut collaterals, &entries, Epoch::new(1))
            .await;

        assert_eq!(outcomes[0].applied_repay, d("500"));
        assert_eq!(outcomes[0].refunded, d("300"));
        assert_eq!(fx.custody.balance(&fx.usdc, &liq), d("300"));
        assert_eq!(borrowed.owed(&bob), d("500"));
    }

    #[tokio::test]
    async fn test_healthy_borrower_voids_and_refunds() {
        let fx = fixture();
        let bob = Address::new("0xb");
        let liq = Address::new("0x1");
        let mut borrowed = borrowed_ledger(&bob, "1000");
        let mut collaterals = collateral_ledger(&bob, "10");
        let before = borrowed.clone();

        let entries = vec![liquidate(0, "0x1", "0xb", &fx.eth, "400")];
        let outcomes = fx
            .processor
            .process(&fx.usdc, &mut borrowed, &mut collaterals, &entries, Epoch::new(1))
            .await;

        assert_eq!(
            outcomes[0].status,
            LiquidationStatus::Voided {
                reason: LiquidationStaleError::NotUnderwater
            }
        );
        assert_eq!(borrowed, before);
        assert_eq!(fx.custody.balance(&fx.usdc, &liq), d("400"));
        assert_eq!(collaterals[&fx.eth].share_balance(&bob), d("10"));
    }

    #[tokio::test]
    async fn test_seize_clamped_to_available_collateral() {
        let fx = fixture();
        let bob = Address::new("0xb");
        fx.risk.set_underwater(&bob, true);
        let mut borrowed = borrowed_ledger(&bob, "10000");
        let mut collaterals = collateral_ledger(&bob, "1");

        // 5000 × 1.08 / 2000 = 2.7 shares wanted, 1 available.
        let entries = vec![liquidate(0, "0x1", "0xb", &fx.eth, "5000")];
        let outcomes = fx
            .processor
            .process(&fx.usdc, &mut borrowed, &mut collaterals, &entries, Epoch::new(1))
            .await;

        assert_eq!(
            outcomes[0].status,
            LiquidationStatus::Partial {
                requested_seize: d("2.7")
            }
        );
        assert_eq!(outcomes[0].seized_shares, d("1"));
        assert_eq!(collaterals[&fx.eth].share_balance(&bob), Decimal::zero());
    }

    #[tokio::test]
    async fn test_second_entry_sees_reduced_debt() {
        let fx = fixture();
        let bob = Address::new("0xb");
        fx.risk.set_underwater(&bob, true);
        let mut borrowed = borrowed_ledger(&bob, "1000");
        let mut collaterals = collateral_ledger(&bob, "10");

        let entries = vec![
            liquidate(0, "0x1", "0xb", &fx.eth, "500"),
            liquidate(1, "0x2", "0xb", &fx.eth, "500"),
        ];
        let outcomes = fx
            .processor
            .process(&fx.usdc, &mut borrowed, &mut collaterals, &entries, Epoch::new(1))
            .await;

        assert_eq!(outcomes[0].applied_repay, d("500"));
        assert_eq!(outcomes[1].applied_repay, d("250"));
        assert_eq!(outcomes[1].refunded, d("250"));
        assert_eq!(borrowed.owed(&bob), d("250"));
    }

    #[tokio::test]
    async fn test_missing_collateral_price_voids() {
        let fx = fixture();
        let bob = Address::new("0xb");
        fx.risk.set_underwater(&bob, true);
        let doge = PoolId::new("DOGE");
        let mut borrowed = borrowed_ledger(&bob, "1000");
        let mut collaterals = collateral_ledger(&bob, "10");
        collaterals.insert(doge.clone(), Box::new(PoolLedgerState::new(PoolParams::default())));

        let entries = vec![liquidate(0, "0x1", "0xb", &doge, "100")];
        let outcomes = fx
            .processor
            .process(&fx.usdc, &mut borrowed, &mut collaterals, &entries, Epoch::new(1))
            .await;

        assert_eq!(
            outcomes[0].status,
            LiquidationStatus::Voided {
                reason: LiquidationStaleError::MissingPrice(doge)
            }
        );
        assert_eq!(borrowed.owed(&bob), d("1000"));
    }
}
