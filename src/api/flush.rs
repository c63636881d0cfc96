use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::api::AppState;
use crate::error::AppError;

/// Close the open round and process it. An empty round reports `{"round": null}`.
pub async fn flush_round(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    match state.coordinator.flush().await {
        Some(report) => {
            let body = serde_json::to_value(&report)
                .map_err(|e| AppError::Internal(format!("failed to encode round report: {}", e)))?;
            Ok(Json(body))
        }
        None => Ok(Json(json!({ "round": null }))),
    }
}
