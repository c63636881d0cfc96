use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::AppState;
use crate::domain::{PoolId, RoundId};
use crate::orchestration::RoundPhase;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub phase: RoundPhase,
    pub current_round: RoundId,
    pub active_pools: Vec<PoolId>,
    pub registered_pools: Vec<PoolId>,
    pub worker_pool_size: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let coordinator = &state.coordinator;
    Json(StatusResponse {
        phase: coordinator.phase(),
        current_round: coordinator.current_round(),
        active_pools: coordinator.active_pools(),
        registered_pools: coordinator.ledgers().pool_ids(),
        worker_pool_size: state.config.worker_pool_size,
    })
}
