use std::sync::Arc;

use axum::{Json, extract::State};
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;
use crate::services::AgentStatus;

#[derive(Debug, Serialize, ToSchema)]
pub struct AgentHealthEntry {
    pub id: String,
    pub name: String,
    /// healthy | degraded | unhealthy
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AgentsHealthResponse {
    pub status: String,
    pub timestamp: String,
    pub agents: Vec<AgentHealthEntry>,
}

// Health of every pipeline agent
#[utoipa::path(
    get,
    path = "/v1/agents/health",
    responses(
        (status = 200, description = "Per-agent health", body = AgentsHealthResponse)
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Health"
)]
pub async fn agents_health(State(state): State<Arc<AppState>>) -> Json<AgentsHealthResponse> {
    let reports = state.registry.report().await;

    let overall = if reports.iter().any(|r| r.status == AgentStatus::Unhealthy) {
        "unhealthy"
    } else if reports.iter().any(|r| r.status == AgentStatus::Degraded) {
        "degraded"
    } else {
        "healthy"
    };

    Json(AgentsHealthResponse {
        status: overall.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        agents: reports
            .into_iter()
            .map(|r| AgentHealthEntry {
                id: r.id,
                name: r.name,
                status: r.status.as_str().to_string(),
            })
            .collect(),
    })
}
