use crate::api::AppState;
use crate::error::AppError;
use axum::extract::State;
use axum::Json;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Ready once the batch record store answers.
pub async fn ready(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.repo.count_batch_records().await?;
    Ok(Json(serde_json::json!({
        "status": "ready",
        "pools": state.coordinator.ledgers().pool_ids().len(),
    })))
}
