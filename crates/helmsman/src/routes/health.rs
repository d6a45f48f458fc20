//! Health and leadership endpoints.

use axum::{Json, extract::State};
use helmsman::LeaderRole;
use serde::Serialize;

use super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Basic health check (is the process running?)
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct LeaderResponse {
    key: String,
    node_id: String,
    leader: bool,
    role: LeaderRole,
}

/// Current leadership of this node
pub async fn leader_status(State(state): State<AppState>) -> Json<LeaderResponse> {
    let role = state.elector.role();

    Json(LeaderResponse {
        key: state.elector.identity().unique_key().to_string(),
        node_id: state.node_id.clone(),
        leader: role.is_leader(),
        role,
    })
}
