//! Resolution engine.
//!
//! Pays out every open position against the fixed token payout and zeroes
//! holdings: on success longs collect and shorts pay, on failure the signs
//! flip. Token conservation (positions sum to zero per goal) makes the
//! payout a pure transfer between agents. Resolution runs synchronously in
//! the HTTP handler so failures are visible to the caller, and a goal
//! resolves exactly once.

use anyhow::anyhow;
use tracing::info;

use crate::market::locks::AgentLocks;
use crate::models::{Goal, GoalOutcome, GoalStatus, PAYOUT_AMOUNT};
use crate::store::MarketStore;

#[derive(Debug)]
pub enum ResolutionError {
    NotFound,
    AlreadyResolved,
    Store(anyhow::Error),
}

impl From<anyhow::Error> for ResolutionError {
    fn from(e: anyhow::Error) -> Self {
        ResolutionError::Store(e)
    }
}

pub async fn resolve_goal(
    store: &MarketStore,
    agent_locks: &AgentLocks,
    goal_id: u64,
    outcome: GoalOutcome,
) -> Result<Goal, ResolutionError> {
    let mut goal = store
        .get_goal(goal_id)
        .await?
        .ok_or(ResolutionError::NotFound)?;
    if goal.is_resolved() {
        return Err(ResolutionError::AlreadyResolved);
    }

    let sign = match outcome {
        GoalOutcome::Success => 1.0,
        GoalOutcome::Failure => -1.0,
    };

    for agent in store.list_agents().await? {
        if agent.holding(goal_id) == 0.0 {
            continue;
        }

        let lock = agent_locks.for_agent(agent.id);
        let _guard = lock.lock().await;

        let mut fresh = store
            .get_agent(agent.id)
            .await?
            .ok_or_else(|| anyhow!("agent {} vanished during resolution", agent.id))?;
        let pos = fresh.holding(goal_id);
        if pos == 0.0 {
            continue;
        }

        let payout = sign * pos * PAYOUT_AMOUNT;
        fresh.cash_balance += payout;
        fresh.clear_holding(goal_id);
        store.save_agent(&fresh).await?;

        info!(
            goal_id,
            agent_id = agent.id,
            position = pos,
            payout,
            "position settled at resolution"
        );
    }

    goal.status = GoalStatus::Resolved;
    goal.outcome = Some(outcome);
    store.save_goal(&goal).await?;

    info!(goal_id, ?outcome, "🏁 goal resolved");
    Ok(goal)
}
