//! Core data model: goals, updates, agents, trades, debate artifacts.
//!
//! Every entity here round-trips through JSON in the store (see §store),
//! so field names are part of the persisted format.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed payout per success token at resolution, in units of currency.
pub const PAYOUT_AMOUNT: f64 = 100.0;

/// Starting cash for auto-seeded roster agents.
pub const DEFAULT_AGENT_CASH: f64 = 1000.0;

/// Longest analysis memo we keep per agent per goal; bounds prompt size.
pub const MAX_MEMO_CHARS: usize = 4000;

/// Current wall-clock timestamp as an RFC 3339 string.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    Active,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalOutcome {
    Success,
    Failure,
}

impl GoalOutcome {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }
}

/// A user goal with a target date and a success measurement baked into the
/// description. `base_price` is the latest discovered market price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: u64,
    pub description: String,
    /// ISO calendar date (YYYY-MM-DD).
    pub target_date: String,
    pub created_at: String,
    pub status: GoalStatus,
    pub payout_amount: f64,
    pub outcome: Option<GoalOutcome>,
    pub base_price: Option<f64>,
}

impl Goal {
    pub fn new(id: u64, description: String, target_date: String) -> Self {
        Self {
            id,
            description,
            target_date,
            created_at: now_iso(),
            status: GoalStatus::Active,
            payout_amount: PAYOUT_AMOUNT,
            outcome: None,
            base_price: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status == GoalStatus::Resolved
    }
}

/// A user-reported progress update. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalUpdate {
    pub id: u64,
    pub goal_id: u64,
    pub content: String,
    /// Reporting date, ISO (YYYY-MM-DD). Agents reason "as of" this date.
    pub date: String,
    pub created_at: String,
}

/// A trading agent. Holdings are signed token counts keyed by goal id; the
/// stored form keeps string keys for compatibility with existing records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: u64,
    pub name: String,
    pub cash_balance: f64,
    #[serde(default)]
    pub holdings: BTreeMap<String, f64>,
    /// Latest free-text analysis per goal, referenced by trading prompts.
    #[serde(default)]
    pub analysis: BTreeMap<String, String>,
    pub created_at: String,
}

impl Agent {
    pub fn new(id: u64, name: String, cash_balance: f64) -> Self {
        Self {
            id,
            name,
            cash_balance,
            holdings: BTreeMap::new(),
            analysis: BTreeMap::new(),
            created_at: now_iso(),
        }
    }

    /// Signed token position for a goal; positive = long, negative = short.
    pub fn holding(&self, goal_id: u64) -> f64 {
        self.holdings
            .get(&goal_id.to_string())
            .copied()
            .unwrap_or(0.0)
    }

    pub fn add_holding(&mut self, goal_id: u64, delta: f64) {
        let entry = self.holdings.entry(goal_id.to_string()).or_insert(0.0);
        *entry += delta;
        if *entry == 0.0 {
            self.holdings.remove(&goal_id.to_string());
        }
    }

    pub fn clear_holding(&mut self, goal_id: u64) {
        self.holdings.remove(&goal_id.to_string());
    }

    pub fn memo(&self, goal_id: u64) -> Option<&str> {
        self.analysis.get(&goal_id.to_string()).map(|s| s.as_str())
    }

    pub fn set_memo(&mut self, goal_id: u64, memo: &str) {
        let capped: String = memo.chars().take(MAX_MEMO_CHARS).collect();
        self.analysis.insert(goal_id.to_string(), capped);
    }

    /// Mark-to-max value of long positions (tokens * payout).
    pub fn assets_value(&self) -> f64 {
        self.holdings
            .values()
            .filter(|v| **v > 0.0)
            .map(|v| v * PAYOUT_AMOUNT)
            .sum()
    }

    /// Worst-case liability of short positions (|tokens| * payout).
    pub fn liabilities_value(&self) -> f64 {
        self.holdings
            .values()
            .filter(|v| **v < 0.0)
            .map(|v| -v * PAYOUT_AMOUNT)
            .sum()
    }

    pub fn net_worth(&self) -> f64 {
        self.cash_balance + self.assets_value() - self.liabilities_value()
    }
}

/// One agent's contribution to a debate round. `update_id` 0 denotes the
/// goal-creation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateMessage {
    pub goal_id: u64,
    pub update_id: u64,
    pub agent_id: u64,
    pub round: u32,
    pub content: String,
    pub created_at: String,
}

/// A quoted spread. `sell_price` is absent when the agent was only asked for
/// a bid (initial auctions) or declined to quote an ask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpread {
    pub agent_id: u64,
    pub buy_price: f64,
    pub sell_price: Option<f64>,
}

/// An executed transfer of tokens from seller to buyer. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub goal_id: u64,
    pub update_id: u64,
    pub buyer_agent_id: u64,
    pub seller_agent_id: u64,
    pub price: f64,
    pub quantity: f64,
    pub created_at: String,
}

/// Per-agent prediction history: the quote an agent gave for an event next
/// to the price the market actually discovered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHistoryEntry {
    pub goal_id: u64,
    pub update_id: u64,
    pub buy_price: f64,
    pub sell_price: Option<f64>,
    pub market_price: Option<f64>,
    pub created_at: String,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub store_host: String,
    pub store_port: u16,
    pub store_username: Option<String>,
    pub store_password: Option<String>,
    pub oracle_api_key: String,
    pub oracle_base_url: String,
    pub oracle_model: String,
    pub num_agents: usize,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let store_host =
            std::env::var("STORE_HOST").map_err(|_| anyhow::anyhow!("STORE_HOST not set"))?;

        let store_port = std::env::var("STORE_PORT")
            .map_err(|_| anyhow::anyhow!("STORE_PORT not set"))?
            .parse::<u16>()
            .map_err(|_| anyhow::anyhow!("STORE_PORT is not a valid port"))?;

        let store_username = std::env::var("STORE_USERNAME")
            .ok()
            .filter(|s| !s.trim().is_empty());
        let store_password = std::env::var("STORE_PASSWORD")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let oracle_api_key = std::env::var("ORACLE_API_KEY")
            .map_err(|_| anyhow::anyhow!("ORACLE_API_KEY not set"))?;

        let oracle_base_url = std::env::var("ORACLE_BASE_URL")
            .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string());

        let oracle_model = std::env::var("ORACLE_MODEL")
            .unwrap_or_else(|_| "deepseek/deepseek-r1".to_string());

        let num_agents = std::env::var("NUM_AGENTS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(3);

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .unwrap_or(8000);

        Ok(Self {
            store_host,
            store_port,
            store_username,
            store_password,
            oracle_api_key,
            oracle_base_url,
            oracle_model,
            num_agents,
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holdings_serialize_with_string_keys() {
        let mut agent = Agent::new(1, "Alice".to_string(), 1000.0);
        agent.add_holding(7, 2.0);
        let json = serde_json::to_value(&agent).unwrap();
        assert_eq!(json["holdings"]["7"], 2.0);

        let back: Agent = serde_json::from_value(json).unwrap();
        assert_eq!(back.holding(7), 2.0);
    }

    #[test]
    fn zeroed_holdings_are_dropped() {
        let mut agent = Agent::new(1, "Alice".to_string(), 1000.0);
        agent.add_holding(3, 1.0);
        agent.add_holding(3, -1.0);
        assert!(agent.holdings.is_empty());
    }

    #[test]
    fn net_worth_counts_shorts_as_liabilities() {
        let mut agent = Agent::new(2, "Bob".to_string(), 500.0);
        agent.add_holding(1, 2.0); // 200 in assets
        agent.add_holding(2, -3.0); // 300 in liabilities
        assert_eq!(agent.assets_value(), 200.0);
        assert_eq!(agent.liabilities_value(), 300.0);
        assert_eq!(agent.net_worth(), 400.0);
    }

    #[test]
    fn memo_is_capped() {
        let mut agent = Agent::new(3, "Charlie".to_string(), 100.0);
        let long_memo = "x".repeat(MAX_MEMO_CHARS + 500);
        agent.set_memo(1, &long_memo);
        assert_eq!(agent.memo(1).unwrap().len(), MAX_MEMO_CHARS);
    }

    #[test]
    fn outcome_parse_is_strict() {
        assert_eq!(GoalOutcome::parse("success"), Some(GoalOutcome::Success));
        assert_eq!(GoalOutcome::parse(" FAILURE "), Some(GoalOutcome::Failure));
        assert_eq!(GoalOutcome::parse("maybe"), None);
    }
}
