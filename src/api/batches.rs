use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::domain::{BatchRecord, PoolId};
use crate::error::AppError;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct BatchesQuery {
    pub pool: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchesResponse {
    pub count: usize,
    pub records: Vec<BatchRecord>,
}

pub async fn get_batches(
    Query(params): Query<BatchesQuery>,
    State(state): State<AppState>,
) -> Result<Json<BatchesResponse>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }
    let pool = params
        .pool
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PoolId::new);

    let records = state.repo.query_batch_records(pool.as_ref(), limit).await?;
    Ok(Json(BatchesResponse {
        count: records.len(),
        records,
    }))
}
