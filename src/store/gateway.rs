//! Typed CRUD gateway over the raw store.
//!
//! Key layout:
//! - `goal:{id}` / `goals:all`, `update:{id}` / `goal:{id}:updates`,
//!   `agent:{id}` / `agents:all`: entity JSON plus id sets
//! - `debate:{goal}:{update}`: list of debate messages, append order
//! - `spreads:{goal}:{update}`: JSON array of quoted spreads
//! - `trade:{id}`, `goal:{g}:trades`, `goal:{g}:update:{u}:trades`
//! - `agent:{id}:history`: list of history entries
//! - `goal:{id}:token_supply`: outstanding long interest, informational
//! - `goal:id`, `update:id`, `agent:id`, `trade:id`: atomic counters
//!
//! List operations return stable orderings: by id for goals/agents/trades,
//! newest-first by creation timestamp for updates.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

use crate::models::{Agent, AgentHistoryEntry, AgentSpread, DebateMessage, Goal, GoalUpdate, Trade};
use crate::store::backend::KvBackend;

/// Id counter namespaces. `next_id` is atomic within each.
#[derive(Debug, Clone, Copy)]
pub enum IdNamespace {
    Goal,
    Update,
    Agent,
    Trade,
}

impl IdNamespace {
    fn key(self) -> &'static str {
        match self {
            IdNamespace::Goal => "goal:id",
            IdNamespace::Update => "update:id",
            IdNamespace::Agent => "agent:id",
            IdNamespace::Trade => "trade:id",
        }
    }
}

#[derive(Clone)]
pub struct MarketStore {
    kv: Arc<dyn KvBackend>,
}

impl MarketStore {
    pub fn new(kv: Arc<dyn KvBackend>) -> Self {
        Self { kv }
    }

    pub async fn next_id(&self, ns: IdNamespace) -> Result<u64> {
        self.kv.incr(ns.key()).await
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.kv.get(key).await? {
            Some(raw) => {
                let value =
                    serde_json::from_str(&raw).with_context(|| format!("corrupt record {key}"))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.kv.set(key, &raw).await
    }

    async fn load_by_ids<T: DeserializeOwned>(&self, prefix: &str, ids_key: &str) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for id in self.kv.smembers(ids_key).await? {
            if let Some(item) = self.get_json(&format!("{prefix}{id}")).await? {
                out.push(item);
            }
        }
        Ok(out)
    }

    // ---- goals ----

    pub async fn get_goal(&self, id: u64) -> Result<Option<Goal>> {
        self.get_json(&format!("goal:{id}")).await
    }

    /// Fully overwrites the stored record.
    pub async fn save_goal(&self, goal: &Goal) -> Result<()> {
        self.set_json(&format!("goal:{}", goal.id), goal).await?;
        self.kv.sadd("goals:all", &goal.id.to_string()).await
    }

    pub async fn list_goals(&self) -> Result<Vec<Goal>> {
        let mut goals: Vec<Goal> = self.load_by_ids("goal:", "goals:all").await?;
        goals.sort_by_key(|g| g.id);
        Ok(goals)
    }

    // ---- agents ----

    pub async fn get_agent(&self, id: u64) -> Result<Option<Agent>> {
        self.get_json(&format!("agent:{id}")).await
    }

    pub async fn save_agent(&self, agent: &Agent) -> Result<()> {
        self.set_json(&format!("agent:{}", agent.id), agent).await?;
        self.kv.sadd("agents:all", &agent.id.to_string()).await
    }

    pub async fn list_agents(&self) -> Result<Vec<Agent>> {
        let mut agents: Vec<Agent> = self.load_by_ids("agent:", "agents:all").await?;
        agents.sort_by_key(|a| a.id);
        Ok(agents)
    }

    // ---- updates ----

    pub async fn get_update(&self, id: u64) -> Result<Option<GoalUpdate>> {
        self.get_json(&format!("update:{id}")).await
    }

    pub async fn save_update(&self, update: &GoalUpdate) -> Result<()> {
        self.set_json(&format!("update:{}", update.id), update).await?;
        self.kv
            .sadd(
                &format!("goal:{}:updates", update.goal_id),
                &update.id.to_string(),
            )
            .await
    }

    /// Updates for a goal, newest first.
    pub async fn list_updates_by_goal(&self, goal_id: u64) -> Result<Vec<GoalUpdate>> {
        let mut updates: Vec<GoalUpdate> = self
            .load_by_ids("update:", &format!("goal:{goal_id}:updates"))
            .await?;
        updates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(updates)
    }

    // ---- debate transcripts ----

    pub async fn append_debate_message(&self, message: &DebateMessage) -> Result<()> {
        let key = format!("debate:{}:{}", message.goal_id, message.update_id);
        self.kv.rpush(&key, &serde_json::to_string(message)?).await
    }

    pub async fn list_debate(&self, goal_id: u64, update_id: u64) -> Result<Vec<DebateMessage>> {
        let key = format!("debate:{goal_id}:{update_id}");
        self.kv
            .lrange(&key)
            .await?
            .iter()
            .map(|raw| {
                serde_json::from_str(raw).with_context(|| format!("corrupt debate message in {key}"))
            })
            .collect()
    }

    pub async fn list_debate_round(
        &self,
        goal_id: u64,
        update_id: u64,
        round: u32,
    ) -> Result<Vec<DebateMessage>> {
        let all = self.list_debate(goal_id, update_id).await?;
        Ok(all.into_iter().filter(|m| m.round == round).collect())
    }

    // ---- spreads ----

    pub async fn store_spreads(
        &self,
        goal_id: u64,
        update_id: u64,
        spreads: &[AgentSpread],
    ) -> Result<()> {
        self.set_json(&format!("spreads:{goal_id}:{update_id}"), &spreads)
            .await
    }

    pub async fn get_spreads(&self, goal_id: u64, update_id: u64) -> Result<Vec<AgentSpread>> {
        Ok(self
            .get_json(&format!("spreads:{goal_id}:{update_id}"))
            .await?
            .unwrap_or_default())
    }

    // ---- trades ----

    pub async fn append_trade(&self, trade: &Trade) -> Result<()> {
        self.set_json(&format!("trade:{}", trade.id), trade).await?;
        let id = trade.id.to_string();
        self.kv
            .sadd(&format!("goal:{}:trades", trade.goal_id), &id)
            .await?;
        self.kv
            .sadd(
                &format!("goal:{}:update:{}:trades", trade.goal_id, trade.update_id),
                &id,
            )
            .await
    }

    pub async fn list_trades_for_event(&self, goal_id: u64, update_id: u64) -> Result<Vec<Trade>> {
        let mut trades: Vec<Trade> = self
            .load_by_ids("trade:", &format!("goal:{goal_id}:update:{update_id}:trades"))
            .await?;
        trades.sort_by_key(|t| t.id);
        Ok(trades)
    }

    pub async fn list_trades_for_goal(&self, goal_id: u64) -> Result<Vec<Trade>> {
        let mut trades: Vec<Trade> = self
            .load_by_ids("trade:", &format!("goal:{goal_id}:trades"))
            .await?;
        trades.sort_by_key(|t| t.id);
        Ok(trades)
    }

    // ---- agent history ----

    pub async fn append_agent_history(
        &self,
        agent_id: u64,
        entry: &AgentHistoryEntry,
    ) -> Result<()> {
        let key = format!("agent:{agent_id}:history");
        self.kv.rpush(&key, &serde_json::to_string(entry)?).await
    }

    /// Last `n` history entries for an agent, oldest of the tail first.
    pub async fn tail_agent_history(&self, agent_id: u64, n: usize) -> Result<Vec<AgentHistoryEntry>> {
        let key = format!("agent:{agent_id}:history");
        let raw = self.kv.lrange(&key).await?;
        let skip = raw.len().saturating_sub(n);
        raw[skip..]
            .iter()
            .map(|raw| {
                serde_json::from_str(raw).with_context(|| format!("corrupt history entry in {key}"))
            })
            .collect()
    }

    // ---- token supply ----

    pub async fn get_token_supply(&self, goal_id: u64) -> Result<f64> {
        Ok(self
            .kv
            .get(&format!("goal:{goal_id}:token_supply"))
            .await?
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0))
    }

    pub async fn set_token_supply(&self, goal_id: u64, supply: f64) -> Result<()> {
        self.kv
            .set(&format!("goal:{goal_id}:token_supply"), &supply.to_string())
            .await
    }
}
