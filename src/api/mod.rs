pub mod batches;
pub mod flush;
pub mod health;
pub mod pools;
pub mod requests;
pub mod status;

use crate::config::Config;
use crate::db::Repository;
use crate::orchestration::RoundCoordinator;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config: Config,
    pub coordinator: Arc<RoundCoordinator>,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, config: Config, coordinator: Arc<RoundCoordinator>) -> Self {
        Self {
            repo,
            config,
            coordinator,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/requests", post(requests::submit_request))
        .route("/v1/flush", post(flush::flush_round))
        .route("/v1/status", get(status::get_status))
        .route("/v1/pools/:pool", get(pools::get_pool))
        .route(
            "/v1/pools/:pool/accounts/:account",
            get(pools::get_account),
        )
        .route("/v1/batches", get(batches::get_batches))
        .layer(cors)
        .with_state(state)
}
