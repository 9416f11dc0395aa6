//! Axum router wiring (local WS upgrades + operational endpoints).

use axum::{routing::get, Router};

use crate::{app_state::AppState, ops, transport};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/doom", get(transport::ws::doom_upgrade))
        .route("/meta", get(transport::ws::meta_upgrade))
        .route("/healthz", get(ops::healthz))
        .route("/readyz", get(ops::readyz))
        .route("/metrics", get(ops::metrics))
        .route("/v1/info", get(ops::info))
        .with_state(state)
}
