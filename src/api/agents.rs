//! Agent endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::api::AppState;
use crate::error::ApiError;
use crate::models::{Agent, AgentHistoryEntry, DEFAULT_AGENT_CASH};
use crate::store::gateway::IdNamespace;

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    pub cash_balance: Option<f64>,
}

pub async fn create_agent(
    State(state): State<AppState>,
    Json(req): Json<CreateAgentRequest>,
) -> Result<Json<Agent>, ApiError> {
    let id = state.store.next_id(IdNamespace::Agent).await?;
    let agent = Agent::new(id, req.name, req.cash_balance.unwrap_or(DEFAULT_AGENT_CASH));
    state.store.save_agent(&agent).await?;
    Ok(Json(agent))
}

pub async fn list_agents(State(state): State<AppState>) -> Result<Json<Vec<Agent>>, ApiError> {
    Ok(Json(state.store.list_agents().await?))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<u64>,
) -> Result<Json<Agent>, ApiError> {
    let agent = state
        .store
        .get_agent(agent_id)
        .await?
        .ok_or(ApiError::NotFound("Agent"))?;
    Ok(Json(agent))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Tail of the agent's prediction history: its quotes next to the prices
/// the market discovered.
pub async fn agent_history(
    State(state): State<AppState>,
    Path(agent_id): Path<u64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<AgentHistoryEntry>>, ApiError> {
    state
        .store
        .get_agent(agent_id)
        .await?
        .ok_or(ApiError::NotFound("Agent"))?;

    let limit = query.limit.unwrap_or(50);
    Ok(Json(state.store.tail_agent_history(agent_id, limit).await?))
}
