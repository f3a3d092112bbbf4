use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::errors::ApiError;
use crate::api::SharedOverseer;
use crate::domain::agent::{AgentRecord, AgentStatus};
use crate::overseer::SyncOutcome;

/// One tracked agent as reported over HTTP
#[derive(Debug, Serialize)]
pub struct AgentResponse {
    pub id: String,
    pub address: String,
    pub status: AgentStatus,
    pub last_seen: DateTime<Utc>,
    pub last_dispatched: Option<DateTime<Utc>>,
    pub missed_syncs: u32,
}

impl From<&AgentRecord> for AgentResponse {
    fn from(agent: &AgentRecord) -> Self {
        Self {
            id: agent.id().to_string(),
            address: agent.address().to_string(),
            status: agent.status(),
            last_seen: agent.last_seen(),
            last_dispatched: agent.last_dispatched(),
            missed_syncs: agent.missed_syncs(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AgentCountResponse {
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub outcome: SyncOutcome,
    pub root: Option<String>,
    pub agent_count: usize,
    pub active: bool,
}

pub async fn health_check() -> &'static str {
    "OK"
}

/// List tracked agents
///
/// GET /api/agents
pub async fn list_agents(State(overseer): State<SharedOverseer>) -> Json<Vec<AgentResponse>> {
    let overseer = overseer.lock().await;
    let agents = overseer.agents().map(AgentResponse::from).collect();
    Json(agents)
}

/// GET /api/agents/count
pub async fn agent_count(State(overseer): State<SharedOverseer>) -> Json<AgentCountResponse> {
    let overseer = overseer.lock().await;
    Json(AgentCountResponse {
        count: overseer.get_agent_count(),
    })
}

/// Pull the ledger snapshot now instead of waiting for the next tick
///
/// POST /api/sync
pub async fn sync_state(
    State(overseer): State<SharedOverseer>,
) -> Result<Json<SyncResponse>, ApiError> {
    let mut overseer = overseer.lock().await;
    let outcome = overseer.sync_state().await?;

    Ok(Json(SyncResponse {
        outcome,
        root: overseer.current_root().map(|root| root.to_hex()),
        agent_count: overseer.get_agent_count(),
        active: overseer.is_active(),
    }))
}
