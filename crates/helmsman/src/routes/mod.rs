//! HTTP status routes for the Helmsman binary.

use axum::{Router, routing::get};
use helmsman::Elector;
use std::sync::Arc;

mod health;

/// Shared state for the status routes
#[derive(Clone)]
pub struct AppState {
    /// The running election
    pub elector: Arc<Elector>,

    /// This node's contender ID
    pub node_id: String,
}

/// Create the status router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/leader", get(health::leader_status))
        .with_state(state)
}
