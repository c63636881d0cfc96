use lendnet::domain::{
    Address, Decimal, Epoch, LiquidationStaleError, LiquidationStatus, OpType, PoolId,
    PoolLedgerState, PoolParams,
};
use lendnet::engine::LiquidationParams;
use lendnet::external::{
    Collaborators, InMemoryCustody, LinearRateModel, StaticPriceOracle, StaticRiskEngine,
};
use lendnet::orchestration::{LedgerRegistry, ManualEpochClock, NoopSink, RoundCoordinator};
use std::sync::Arc;

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

struct Market {
    coordinator: RoundCoordinator,
    ledgers: Arc<LedgerRegistry>,
    custody: Arc<InMemoryCustody>,
    risk: Arc<StaticRiskEngine>,
    usdc: PoolId,
    eth: PoolId,
    bob: Address,
}

/// USDC lent out to bob, who posted 0.3 ETH shares as collateral.
fn setup() -> Market {
    let usdc = PoolId::new("USDC");
    let eth = PoolId::new("ETH");
    let bob = Address::new("0xbob");

    let ledgers = Arc::new(LedgerRegistry::new());
    let mut usdc_ledger = PoolLedgerState::new(PoolParams::default());
    usdc_ledger.credit_shares(&Address::new("0xlender"), d("10000"));
    usdc_ledger.total_supply = d("10000");
    usdc_ledger.cash = d("9000");
    usdc_ledger.total_borrows = d("1000");
    usdc_ledger.set_owed(&bob, d("1000"));
    ledgers.insert(usdc.clone(), usdc_ledger);

    let mut eth_ledger = PoolLedgerState::new(PoolParams::default());
    eth_ledger.credit_shares(&Address::new("0xlender"), d("9.7"));
    eth_ledger.credit_shares(&bob, d("0.3"));
    eth_ledger.total_supply = d("10");
    eth_ledger.cash = d("10");
    ledgers.insert(eth.clone(), eth_ledger);

    let custody = Arc::new(InMemoryCustody::new());
    let risk = Arc::new(StaticRiskEngine::new());
    risk.set_underwater(&bob, true);
    let oracle = StaticPriceOracle::new()
        .with_price(&usdc, Decimal::one())
        .with_price(&eth, d("2000"));

    let coordinator = RoundCoordinator::assemble(
        ledgers.clone(),
        Collaborators {
            custody: custody.clone(),
            risk: risk.clone(),
            rate_model: Arc::new(LinearRateModel::flat(Decimal::zero())),
            oracle: Arc::new(oracle),
        },
        LiquidationParams::default(),
        Arc::new(ManualEpochClock::new(Epoch::new(1))),
        Arc::new(NoopSink),
        2,
    );

    Market {
        coordinator,
        ledgers,
        custody,
        risk,
        usdc,
        eth,
        bob,
    }
}

impl Market {
    async fn liquidate(&self, liquidator: &str, amount: &str) {
        let liquidator = Address::new(liquidator);
        self.custody.credit(&self.usdc, &liquidator, d(amount));
        self.coordinator
            .collector()
            .submit(
                &self.usdc,
                OpType::Liquidate {
                    borrower: self.bob.clone(),
                    collateral: self.eth.clone(),
                },
                &liquidator,
                d(amount),
            )
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_second_liquidation_sees_reduced_debt() {
    let m = setup();
    m.liquidate("0xl1", "500").await;
    m.liquidate("0xl2", "500").await;

    let report = m.coordinator.flush().await.unwrap();
    assert!(report.aborted.is_empty());
    let record = report.record(&m.usdc).unwrap();
    assert_eq!(record.liquidations.len(), 2);

    let first = &record.liquidations[0];
    assert_eq!(first.liquidator, Address::new("0xl1"));
    assert_eq!(first.applied_repay, d("500"));
    assert_eq!(first.seized_shares, d("0.27"));
    assert_eq!(first.status, LiquidationStatus::Settled);

    // Debt is 500 now; close factor caps the second entry at 250.
    let second = &record.liquidations[1];
    assert_eq!(second.applied_repay, d("250"));
    assert_eq!(second.refunded, d("250"));
    assert_eq!(second.seized_shares, d("0.03"));
    assert_eq!(
        second.status,
        LiquidationStatus::Partial {
            requested_seize: d("0.135")
        }
    );
    assert_eq!(record.effective.liquidation_repay, d("750"));

    let usdc = m.ledgers.snapshot(&m.usdc).await.unwrap();
    assert_eq!(usdc.owed(&m.bob), d("250"));
    assert_eq!(usdc.total_borrows, d("250"));
    assert_eq!(usdc.cash, d("9750"));

    let eth = m.ledgers.snapshot(&m.eth).await.unwrap();
    assert_eq!(eth.share_balance(&m.bob), Decimal::zero());
    assert_eq!(eth.share_balance(&Address::new("0xl1")), d("0.27"));
    assert_eq!(eth.share_balance(&Address::new("0xl2")), d("0.03"));
    assert_eq!(eth.total_supply, d("10"));
    assert_eq!(eth.sum_account_shares(), eth.total_supply);

    assert_eq!(m.custody.balance(&m.usdc, &Address::new("0xl2")), d("250"));
}

#[tokio::test]
async fn test_close_factor_caps_single_entry() {
    let m = setup();
    m.liquidate("0xl1", "800").await;

    let report = m.coordinator.flush().await.unwrap();
    let outcome = &report.record(&m.usdc).unwrap().liquidations[0];
    assert_eq!(outcome.applied_repay, d("500"));
    assert_eq!(outcome.refunded, d("300"));
    assert_eq!(m.custody.balance(&m.usdc, &Address::new("0xl1")), d("300"));
}

#[tokio::test]
async fn test_recovered_borrower_voids_and_refunds() {
    let m = setup();
    m.liquidate("0xl1", "400").await;
    m.risk.set_underwater(&m.bob, false);

    let report = m.coordinator.flush().await.unwrap();
    let outcome = &report.record(&m.usdc).unwrap().liquidations[0];
    assert_eq!(
        outcome.status,
        LiquidationStatus::Voided {
            reason: LiquidationStaleError::NotUnderwater
        }
    );
    assert_eq!(outcome.refunded, d("400"));
    assert_eq!(m.custody.balance(&m.usdc, &Address::new("0xl1")), d("400"));

    let usdc = m.ledgers.snapshot(&m.usdc).await.unwrap();
    assert_eq!(usdc.owed(&m.bob), d("1000"));
    assert_eq!(usdc.cash, d("9000"));
    let eth = m.ledgers.snapshot(&m.eth).await.unwrap();
    assert_eq!(eth.share_balance(&m.bob), d("0.3"));
}

#[tokio::test]
async fn test_liquidation_and_netting_share_a_round() {
    let m = setup();
    m.custody.credit(&m.usdc, &m.bob, d("100"));
    m.coordinator
        .collector()
        .submit(&m.usdc, OpType::Repay, &m.bob, d("100"))
        .await
        .unwrap();
    m.liquidate("0xl1", "1000").await;

    let report = m.coordinator.flush().await.unwrap();
    let record = report.record(&m.usdc).unwrap();
    assert_eq!(record.effective.repay, d("100"));

    // Netting runs first: the liquidation sees 900 owed.
    let outcome = &record.liquidations[0];
    assert_eq!(outcome.applied_repay, d("450"));
    assert_eq!(outcome.refunded, d("550"));

    let usdc = m.ledgers.snapshot(&m.usdc).await.unwrap();
    assert_eq!(usdc.owed(&m.bob), d("450"));
    assert_eq!(usdc.total_borrows, d("450"));
    assert_eq!(usdc.cash, d("9550"));
}
