use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::api::AppState;
use crate::domain::{Address, Decimal, OpKind, OpType, PoolId, RequestId};
use crate::error::AppError;

/// Body of `POST /v1/requests`; the operation's `type` tag sits at top level.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequestBody {
    pub pool: String,
    pub account: String,
    pub amount: Decimal,
    #[serde(flatten)]
    pub op: OpType,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub request_id: RequestId,
    pub pool: PoolId,
    pub op: OpKind,
    pub pending: u64,
}

pub async fn submit_request(
    State(state): State<AppState>,
    Json(body): Json<SubmitRequestBody>,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let account = Address::from_str(&body.account)
        .map_err(|_| AppError::BadRequest("Invalid account address".into()))?;
    let pool = PoolId::new(body.pool.trim());
    let op = body.op.kind();

    let collector = state.coordinator.collector();
    let request_id = collector.submit(&pool, body.op, &account, body.amount).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            request_id,
            pending: collector.pending(&pool),
            pool,
            op,
        }),
    ))
}
