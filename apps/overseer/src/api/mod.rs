// API layer module (adapters for controllers)
// Follows Hexagonal Architecture - API is an adapter

pub mod errors;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::overseer::SwarmOverseer;
use handlers::{agents, tasks};

/// Overseer shared by handlers and background jobs; one call at a time
pub type SharedOverseer = Arc<Mutex<SwarmOverseer>>;

/// All overseer routes over shared state
pub fn router(overseer: SharedOverseer) -> Router {
    Router::new()
        // Health check
        .route("/health", get(agents::health_check))
        // Swarm state
        .route("/api/agents", get(agents::list_agents))
        .route("/api/agents/count", get(agents::agent_count))
        .route("/api/sync", post(agents::sync_state))
        // Task lifecycle and agent callbacks
        .route("/api/tasks", post(tasks::create_task))
        .route("/api/tasks/:id", get(tasks::get_task))
        .route("/api/tasks/:id/ack", post(tasks::ack_task))
        .route("/api/tasks/:id/complete", post(tasks::complete_task))
        .route("/api/tasks/:id/cancel", post(tasks::cancel_task))
        .with_state(overseer)
}
