//! Goal endpoints: creation, updates, resolution, market analysis.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::AppState;
use crate::error::ApiError;
use crate::market::resolution::ResolutionError;
use crate::models::{now_iso, AgentSpread, DebateMessage, Goal, GoalOutcome, GoalUpdate, Trade};
use crate::store::gateway::IdNamespace;

#[derive(Debug, Deserialize)]
pub struct CreateGoalRequest {
    pub goal: String,
    pub measurement: String,
    /// DD/MM/YYYY, converted to ISO for storage.
    pub date: String,
}

pub async fn create_goal(
    State(state): State<AppState>,
    Json(req): Json<CreateGoalRequest>,
) -> Result<Json<Goal>, ApiError> {
    let target = NaiveDate::parse_from_str(&req.date, "%d/%m/%Y")
        .map_err(|_| ApiError::InvalidDate("DD/MM/YYYY"))?;

    let id = state.store.next_id(IdNamespace::Goal).await?;
    let goal = Goal::new(
        id,
        format!("{} (Measurement: {})", req.goal, req.measurement),
        target.format("%Y-%m-%d").to_string(),
    );
    state.store.save_goal(&goal).await?;

    info!(goal_id = id, "🎯 goal created; opening auction queued");
    state.engine.spawn_auction(id, 0);

    Ok(Json(goal))
}

pub async fn list_goals(State(state): State<AppState>) -> Result<Json<Vec<Goal>>, ApiError> {
    Ok(Json(state.store.list_goals().await?))
}

pub async fn get_goal(
    State(state): State<AppState>,
    Path(goal_id): Path<u64>,
) -> Result<Json<Goal>, ApiError> {
    let goal = state
        .store
        .get_goal(goal_id)
        .await?
        .ok_or(ApiError::NotFound("Goal"))?;
    Ok(Json(goal))
}

#[derive(Debug, Deserialize)]
pub struct CreateUpdateRequest {
    pub content: String,
    /// ISO date (YYYY-MM-DD).
    pub date: String,
}

pub async fn create_update(
    State(state): State<AppState>,
    Path(goal_id): Path<u64>,
    Json(req): Json<CreateUpdateRequest>,
) -> Result<Json<GoalUpdate>, ApiError> {
    let goal = state
        .store
        .get_goal(goal_id)
        .await?
        .ok_or(ApiError::NotFound("Goal"))?;
    if goal.is_resolved() {
        return Err(ApiError::GoalNotActive);
    }

    NaiveDate::parse_from_str(&req.date, "%Y-%m-%d")
        .map_err(|_| ApiError::InvalidDate("YYYY-MM-DD"))?;

    let id = state.store.next_id(IdNamespace::Update).await?;
    let update = GoalUpdate {
        id,
        goal_id,
        content: req.content,
        date: req.date,
        created_at: now_iso(),
    };
    state.store.save_update(&update).await?;

    info!(goal_id, update_id = id, "📈 progress update filed; trading round queued");
    state.engine.spawn_auction(goal_id, id);

    Ok(Json(update))
}

pub async fn list_updates(
    State(state): State<AppState>,
    Path(goal_id): Path<u64>,
) -> Result<Json<Vec<GoalUpdate>>, ApiError> {
    state
        .store
        .get_goal(goal_id)
        .await?
        .ok_or(ApiError::NotFound("Goal"))?;
    Ok(Json(state.store.list_updates_by_goal(goal_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub outcome: String,
}

pub async fn resolve_goal(
    State(state): State<AppState>,
    Path(goal_id): Path<u64>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<Goal>, ApiError> {
    let outcome = GoalOutcome::parse(&req.outcome).ok_or(ApiError::InvalidOutcome)?;

    let goal = state
        .engine
        .resolve(goal_id, outcome)
        .await
        .map_err(|e| match e {
            ResolutionError::NotFound => ApiError::NotFound("Goal"),
            ResolutionError::AlreadyResolved => ApiError::AlreadyResolved,
            ResolutionError::Store(inner) => ApiError::Store(inner),
        })?;

    Ok(Json(goal))
}

#[derive(Debug, Serialize)]
pub struct MarketAnalysisResponse {
    pub update_id: u64,
    pub update_content: String,
    pub update_date: String,
    pub debate_messages: Vec<DebateMessage>,
    pub agent_spreads: Vec<AgentSpread>,
    pub trades: Vec<Trade>,
    pub market_price: Option<f64>,
}

/// Full audit trail of one market event. Update id 0 is the goal-creation
/// auction, described by the goal itself.
pub async fn market_analysis(
    State(state): State<AppState>,
    Path((goal_id, update_id)): Path<(u64, u64)>,
) -> Result<Json<MarketAnalysisResponse>, ApiError> {
    let goal = state
        .store
        .get_goal(goal_id)
        .await?
        .ok_or(ApiError::NotFound("Goal"))?;

    let (update_content, update_date) = if update_id == 0 {
        let creation_date: String = goal.created_at.chars().take(10).collect();
        (goal.description.clone(), creation_date)
    } else {
        let update = state
            .store
            .get_update(update_id)
            .await?
            .filter(|u| u.goal_id == goal_id)
            .ok_or(ApiError::NotFound("Update"))?;
        (update.content, update.date)
    };

    let debate_messages = state.store.list_debate(goal_id, update_id).await?;
    let agent_spreads = state.store.get_spreads(goal_id, update_id).await?;
    let trades = state.store.list_trades_for_event(goal_id, update_id).await?;
    let market_price = if trades.is_empty() {
        None
    } else {
        Some(trades.iter().map(|t| t.price).sum::<f64>() / trades.len() as f64)
    };

    Ok(Json(MarketAnalysisResponse {
        update_id,
        update_content,
        update_date,
        debate_messages,
        agent_spreads,
        trades,
        market_price,
    }))
}

pub async fn list_goal_trades(
    State(state): State<AppState>,
    Path(goal_id): Path<u64>,
) -> Result<Json<Vec<Trade>>, ApiError> {
    state
        .store
        .get_goal(goal_id)
        .await?
        .ok_or(ApiError::NotFound("Goal"))?;
    Ok(Json(state.store.list_trades_for_goal(goal_id).await?))
}
