//! Auction pipeline and event dispatch.
//!
//! Every market-moving event (goal creation, progress update) runs one
//! discrete auction: seed the agent roster if needed, debate in parallel,
//! clear, settle. Auctions for the same goal are serialized; auctions for
//! distinct goals run concurrently. Events are keyed by
//! `(goal_id, update_id)` so a duplicate enqueue while the same event is
//! still in flight is dropped.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::market::debate::run_debate;
use crate::market::locks::{AgentLocks, GoalLocks};
use crate::market::matching::match_spreads;
use crate::market::resolution::{self, ResolutionError};
use crate::market::settlement::settle_event;
use crate::models::{Agent, Goal, GoalOutcome, GoalUpdate, DEFAULT_AGENT_CASH};
use crate::oracle::ReasoningOracle;
use crate::store::gateway::IdNamespace;
use crate::store::MarketStore;

/// Default names for auto-seeded agents.
const ROSTER: &[&str] = &["Alice", "Bob", "Charlie", "Diana", "Eve"];

pub struct MarketEngine {
    pub store: MarketStore,
    oracle: Arc<dyn ReasoningOracle>,
    num_agents: usize,
    agent_locks: AgentLocks,
    goal_locks: GoalLocks,
    /// Serializes roster seeding so concurrent first auctions cannot
    /// over-create agents.
    roster_lock: tokio::sync::Mutex<()>,
    in_flight: Arc<Mutex<HashSet<(u64, u64)>>>,
}

/// Removes the event key when the auction finishes, however it finishes.
pub struct EventGuard {
    in_flight: Arc<Mutex<HashSet<(u64, u64)>>>,
    key: (u64, u64),
}

impl Drop for EventGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.key);
    }
}

impl MarketEngine {
    pub fn new(store: MarketStore, oracle: Arc<dyn ReasoningOracle>, num_agents: usize) -> Self {
        Self {
            store,
            oracle,
            num_agents,
            agent_locks: AgentLocks::new(),
            goal_locks: GoalLocks::new(),
            roster_lock: tokio::sync::Mutex::new(()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Resolves a goal synchronously, serialized against any auction that
    /// is currently trading it.
    pub async fn resolve(&self, goal_id: u64, outcome: GoalOutcome) -> Result<Goal, ResolutionError> {
        let goal_lock = self.goal_locks.for_goal(goal_id);
        let _serialized = goal_lock.lock().await;
        resolution::resolve_goal(&self.store, &self.agent_locks, goal_id, outcome).await
    }

    /// Claims the event key, or returns `None` if that event is already
    /// running.
    pub fn begin_event(&self, goal_id: u64, update_id: u64) -> Option<EventGuard> {
        let key = (goal_id, update_id);
        if !self.in_flight.lock().insert(key) {
            return None;
        }
        Some(EventGuard {
            in_flight: self.in_flight.clone(),
            key,
        })
    }

    /// Enqueues a background auction for the event. Returns immediately;
    /// the auction runs to completion after the HTTP response is sent.
    pub fn spawn_auction(self: &Arc<Self>, goal_id: u64, update_id: u64) {
        let Some(guard) = self.begin_event(goal_id, update_id) else {
            debug!(goal_id, update_id, "auction already in flight; duplicate dropped");
            return;
        };

        let engine = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = engine.run_auction(goal_id, update_id).await {
                error!(goal_id, update_id, "auction failed: {e:#}");
            }
        });
    }

    /// Runs the full auction pipeline for one event. Best-effort: oracle
    /// failures shrink the round, an empty round concludes with no trades.
    pub async fn run_auction(&self, goal_id: u64, update_id: u64) -> Result<()> {
        let goal_lock = self.goal_locks.for_goal(goal_id);
        let _serialized = goal_lock.lock().await;

        let agents = self.ensure_roster().await?;

        let Some(goal) = self.store.get_goal(goal_id).await? else {
            warn!(goal_id, "auction requested for unknown goal");
            return Ok(());
        };
        if goal.is_resolved() {
            info!(goal_id, "goal already resolved; skipping auction");
            return Ok(());
        }

        let mut updates_asc = self.store.list_updates_by_goal(goal_id).await?;
        updates_asc.reverse();

        let update: Option<GoalUpdate> = if update_id > 0 {
            let found = self
                .store
                .get_update(update_id)
                .await?
                .filter(|u| u.goal_id == goal_id);
            if found.is_none() {
                warn!(goal_id, update_id, "auction requested for unknown update");
                return Ok(());
            }
            found
        } else {
            None
        };

        info!(
            goal_id,
            update_id,
            agents = agents.len(),
            "🧠 debate round starting"
        );

        let debate = run_debate(
            &self.store,
            self.oracle.as_ref(),
            &self.agent_locks,
            &goal,
            update.as_ref(),
            &updates_asc,
            &agents,
        )
        .await?;

        if debate.spreads.is_empty() {
            info!(goal_id, update_id, "no spreads collected; auction concludes empty");
            return Ok(());
        }

        let matched = match_spreads(&debate.spreads, update_id == 0);
        let report = settle_event(
            &self.store,
            &self.agent_locks,
            goal_id,
            update_id,
            &matched,
            &debate.spreads,
        )
        .await?;

        info!(
            goal_id,
            update_id,
            spreads = debate.spreads.len(),
            trades = report.trades.len(),
            market_price = report.market_price,
            "auction complete"
        );
        Ok(())
    }

    /// Tops the roster up to the configured size on demand.
    async fn ensure_roster(&self) -> Result<Vec<Agent>> {
        let _seeding = self.roster_lock.lock().await;
        let mut agents = self.store.list_agents().await?;
        while agents.len() < self.num_agents {
            let name = ROSTER[agents.len() % ROSTER.len()];
            let id = self.store.next_id(IdNamespace::Agent).await?;
            let agent = Agent::new(id, name.to_string(), DEFAULT_AGENT_CASH);
            self.store
                .save_agent(&agent)
                .await
                .context("failed to seed agent roster")?;
            info!(agent_id = id, name, "🤖 seeded roster agent");
            agents.push(agent);
        }
        Ok(agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now_iso, Goal};
    use crate::oracle::{OracleMessage, ProviderHint};
    use crate::store::MemoryBackend;
    use async_trait::async_trait;

    /// Answers with a fixed reply per agent name; trading rounds (prompts
    /// that mention the market price) get the second reply if present.
    struct ScriptedOracle {
        auction: Vec<(&'static str, &'static str)>,
        trading: Vec<(&'static str, &'static str)>,
    }

    #[async_trait]
    impl ReasoningOracle for ScriptedOracle {
        async fn ask(
            &self,
            messages: &[OracleMessage],
            _model: Option<&str>,
            _provider: Option<&ProviderHint>,
        ) -> Option<String> {
            let transcript = messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let table = if transcript.contains("CURRENT MARKET PRICE") {
                &self.trading
            } else {
                &self.auction
            };
            table
                .iter()
                .find(|(name, _)| transcript.contains(name))
                .map(|(_, reply)| reply.to_string())
        }
    }

    fn engine(oracle: ScriptedOracle) -> Arc<MarketEngine> {
        let store = MarketStore::new(Arc::new(MemoryBackend::new()));
        Arc::new(MarketEngine::new(store, Arc::new(oracle), 3))
    }

    #[tokio::test]
    async fn event_keys_deduplicate_until_released() {
        let engine = engine(ScriptedOracle {
            auction: vec![],
            trading: vec![],
        });

        let guard = engine.begin_event(1, 0).unwrap();
        assert!(engine.begin_event(1, 0).is_none());
        // A different event on the same goal is its own key.
        assert!(engine.begin_event(1, 2).is_some());

        drop(guard);
        assert!(engine.begin_event(1, 0).is_some());
    }

    #[tokio::test]
    async fn initial_auction_seeds_roster_and_discovers_a_price() {
        let engine = engine(ScriptedOracle {
            auction: vec![
                ("Alice", "Optimistic. <buy>$70.00</buy><sell>$95.00</sell>"),
                ("Bob", "Mixed. <buy>$60.00</buy><sell>$80.00</sell>"),
                ("Charlie", "Doubtful. <buy>$50.00</buy><sell>$65.00</sell>"),
            ],
            trading: vec![],
        });

        let goal = Goal::new(1, "Write a novel (Measurement: manuscript)".into(), "2026-12-01".into());
        engine.store.save_goal(&goal).await.unwrap();

        engine.run_auction(1, 0).await.unwrap();

        // Roster was auto-seeded to three named agents with 1000 cash.
        let agents = engine.store.list_agents().await.unwrap();
        assert_eq!(agents.len(), 3);
        assert_eq!(agents[0].name, "Alice");

        // Alice (bid 70) lifts Charlie's 65 ask; the discovered price is 65.
        let trades = engine.store.list_trades_for_event(1, 0).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, 65.0);

        let goal = engine.store.get_goal(1).await.unwrap().unwrap();
        assert_eq!(goal.base_price, Some(65.0));

        // Token conservation across the roster.
        let net: f64 = engine
            .store
            .list_agents()
            .await
            .unwrap()
            .iter()
            .map(|a| a.holding(1))
            .sum();
        assert_eq!(net, 0.0);
    }

    #[tokio::test]
    async fn update_event_trades_without_the_fallback() {
        let engine = engine(ScriptedOracle {
            auction: vec![
                ("Alice", "Early read. <buy>$40.00</buy><sell>$90.00</sell>"),
                ("Bob", "Early read. <buy>$30.00</buy><sell>$80.00</sell>"),
                ("Charlie", "Early read. <buy>$20.00</buy><sell>$70.00</sell>"),
            ],
            trading: vec![
                ("Alice", "Progress is real. <buy>$72.00</buy><sell>$88.00</sell>"),
                ("Bob", "Agreed. <buy>$68.00</buy><sell>$71.00</sell>"),
                ("Charlie", "Cautious. <buy>$55.00</buy><sell>$92.00</sell>"),
            ],
        });

        let goal = Goal::new(1, "Learn to swim (Measurement: 1km open water)".into(), "2026-12-01".into());
        engine.store.save_goal(&goal).await.unwrap();

        // Initial event: no overlap, so the uniform-price fallback seeds
        // the market at Alice's 40 bid.
        engine.run_auction(1, 0).await.unwrap();
        let seeded = engine.store.get_goal(1).await.unwrap().unwrap();
        assert_eq!(seeded.base_price, Some(40.0));

        // A progress update arrives and triggers a trading round.
        let update = GoalUpdate {
            id: 1,
            goal_id: 1,
            content: "Swam 400m today".into(),
            date: "2026-09-01".into(),
            created_at: now_iso(),
        };
        engine.store.save_update(&update).await.unwrap();
        engine.run_auction(1, 1).await.unwrap();

        // Alice's 72 bid lifts Bob's 71 ask; no stage-2 price forcing.
        let trades = engine.store.list_trades_for_event(1, 1).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, 71.0);
        assert_eq!(trades[0].buyer_agent_id, 1);
        assert_eq!(trades[0].seller_agent_id, 2);

        let goal = engine.store.get_goal(1).await.unwrap().unwrap();
        assert_eq!(goal.base_price, Some(71.0));

        // Spreads for both events are on record.
        assert_eq!(engine.store.get_spreads(1, 0).await.unwrap().len(), 3);
        assert_eq!(engine.store.get_spreads(1, 1).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn auction_with_no_usable_replies_concludes_empty() {
        let engine = engine(ScriptedOracle {
            auction: vec![("Alice", "I refuse to quote.")],
            trading: vec![],
        });

        let goal = Goal::new(1, "goal".into(), "2026-12-01".into());
        engine.store.save_goal(&goal).await.unwrap();

        engine.run_auction(1, 0).await.unwrap();

        assert!(engine.store.list_trades_for_goal(1).await.unwrap().is_empty());
        let goal = engine.store.get_goal(1).await.unwrap().unwrap();
        assert_eq!(goal.base_price, None);
    }

    #[tokio::test]
    async fn resolved_goals_do_not_auction() {
        let engine = engine(ScriptedOracle {
            auction: vec![("Alice", "Quote. <buy>$50.00</buy>")],
            trading: vec![],
        });

        let mut goal = Goal::new(1, "goal".into(), "2026-12-01".into());
        goal.status = crate::models::GoalStatus::Resolved;
        goal.outcome = Some(crate::models::GoalOutcome::Success);
        engine.store.save_goal(&goal).await.unwrap();

        engine.run_auction(1, 0).await.unwrap();
        assert!(engine.store.list_debate(1, 0).await.unwrap().is_empty());
    }
}
