//! Per-entity async lock registries.
//!
//! Agent records are shared by concurrent auctions on different goals, so
//! every read-modify-write of an agent (settlement, resolution payouts,
//! memo updates) runs under that agent's lock. Goal locks serialize whole
//! auctions: at most one auction per goal at a time.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct AgentLocks {
    inner: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<()>>>>,
}

impl AgentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_agent(&self, agent_id: u64) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .lock()
            .entry(agent_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Locks for a buyer/seller pair, ordered by ascending agent id so two
    /// settlements touching the same agents cannot deadlock. Returns one
    /// lock when buyer and seller coincide.
    pub fn for_pair(
        &self,
        a: u64,
        b: u64,
    ) -> (Arc<tokio::sync::Mutex<()>>, Option<Arc<tokio::sync::Mutex<()>>>) {
        if a == b {
            return (self.for_agent(a), None);
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        (self.for_agent(first), Some(self.for_agent(second)))
    }
}

#[derive(Default)]
pub struct GoalLocks {
    inner: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<()>>>>,
}

impl GoalLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_goal(&self, goal_id: u64) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .lock()
            .entry(goal_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
