use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use std::str::FromStr;

use crate::api::AppState;
use crate::domain::{amount_from_shares, Address, Decimal, Epoch, PoolId};
use crate::error::AppError;
use crate::external::utilization;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolResponse {
    pub pool: PoolId,
    pub total_supply: Decimal,
    pub total_borrows: Decimal,
    pub total_reserves: Decimal,
    pub cash: Decimal,
    pub borrow_index: Decimal,
    pub exchange_rate: Decimal,
    pub utilization: Decimal,
    pub accrual_epoch: Epoch,
    pub reserve_factor: Decimal,
    pub pending_requests: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub pool: PoolId,
    pub account: Address,
    pub shares: Decimal,
    /// Shares valued at the pool's current exchange rate.
    pub underlying: Decimal,
    pub borrow_principal: Decimal,
    pub borrow_index_snapshot: Option<Decimal>,
    pub owed: Decimal,
}

pub async fn get_pool(
    Path(pool): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PoolResponse>, AppError> {
    let pool = PoolId::new(pool);
    let ledger = state
        .coordinator
        .ledgers()
        .snapshot(&pool)
        .await
        .ok_or_else(|| AppError::NotFound(format!("pool {}", pool)))?;

    Ok(Json(PoolResponse {
        total_supply: ledger.total_supply,
        total_borrows: ledger.total_borrows,
        total_reserves: ledger.total_reserves,
        cash: ledger.cash,
        borrow_index: ledger.borrow_index,
        exchange_rate: ledger.exchange_rate(),
        utilization: utilization(ledger.cash, ledger.total_borrows, ledger.total_reserves),
        accrual_epoch: ledger.accrual_epoch,
        reserve_factor: ledger.params.reserve_factor,
        pending_requests: state.coordinator.collector().pending(&pool),
        pool,
    }))
}

pub async fn get_account(
    Path((pool, account)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<AccountResponse>, AppError> {
    let pool = PoolId::new(pool);
    let account = Address::from_str(&account)
        .map_err(|_| AppError::BadRequest("Invalid account address".into()))?;
    let ledger = state
        .coordinator
        .ledgers()
        .snapshot(&pool)
        .await
        .ok_or_else(|| AppError::NotFound(format!("pool {}", pool)))?;

    let shares = ledger.share_balance(&account);
    let borrow = ledger.borrows.get(&account).copied();

    Ok(Json(AccountResponse {
        underlying: amount_from_shares(shares, ledger.exchange_rate()),
        shares,
        borrow_principal: borrow.map(|b| b.principal).unwrap_or_default(),
        borrow_index_snapshot: borrow.map(|b| b.index_snapshot),
        owed: ledger.owed(&account),
        pool,
        account,
    }))
}
