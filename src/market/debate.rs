//! Debate orchestrator.
//!
//! One concurrent round per event: every agent gets a prompt, all oracle
//! calls run in parallel, and each usable reply becomes a debate message,
//! an updated analysis memo, and (when it parses) a quoted spread. Agents
//! whose calls fail or whose replies do not parse simply sit the round out.

use anyhow::Result;
use chrono::Utc;
use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::market::locks::AgentLocks;
use crate::market::parser::parse_reply;
use crate::market::prompt;
use crate::models::{now_iso, Agent, AgentSpread, DebateMessage, Goal, GoalUpdate};
use crate::oracle::ReasoningOracle;
use crate::store::MarketStore;

pub struct DebateOutcome {
    pub messages: Vec<DebateMessage>,
    pub spreads: Vec<AgentSpread>,
}

/// Runs the debate round for `(goal, update)`. `update` is `None` for the
/// goal-creation auction; `updates_asc` is the full history, oldest first.
pub async fn run_debate(
    store: &MarketStore,
    oracle: &dyn ReasoningOracle,
    agent_locks: &AgentLocks,
    goal: &Goal,
    update: Option<&GoalUpdate>,
    updates_asc: &[GoalUpdate],
    agents: &[Agent],
) -> Result<DebateOutcome> {
    let update_id = update.map(|u| u.id).unwrap_or(0);
    let trading = update.is_some();

    let calls = agents.iter().map(|agent| {
        let messages = match update {
            None => {
                let today = Utc::now().date_naive().to_string();
                prompt::auction_messages(goal, agent, &today)
            }
            Some(u) => prompt::trading_messages(
                goal,
                agent,
                updates_asc,
                u,
                goal.base_price,
                agent.memo(goal.id),
            ),
        };
        async move { (agent, oracle.ask(&messages, None, None).await) }
    });

    let replies = join_all(calls).await;

    let mut messages = Vec::new();
    let mut spreads = Vec::new();
    for (agent, reply) in replies {
        let Some(text) = reply else {
            warn!(
                goal_id = goal.id,
                update_id,
                agent_id = agent.id,
                "oracle unavailable; agent abstains from this round"
            );
            continue;
        };

        let message = DebateMessage {
            goal_id: goal.id,
            update_id,
            agent_id: agent.id,
            round: 1,
            content: text.clone(),
            created_at: now_iso(),
        };
        store.append_debate_message(&message).await?;
        messages.push(message);

        let Some(parsed) = parse_reply(&text, trading) else {
            warn!(
                goal_id = goal.id,
                update_id,
                agent_id = agent.id,
                "reply had no usable quotes; agent abstains from this round"
            );
            continue;
        };

        // Memo writes share the settlement lock: agent records are
        // read-modify-write and other auctions may touch the same agent.
        {
            let lock = agent_locks.for_agent(agent.id);
            let _guard = lock.lock().await;
            if let Some(mut fresh) = store.get_agent(agent.id).await? {
                fresh.set_memo(goal.id, &parsed.analysis);
                store.save_agent(&fresh).await?;
            }
        }

        let buy_price = if parsed.buy_price > agent.cash_balance {
            warn!(
                goal_id = goal.id,
                agent_id = agent.id,
                quoted = parsed.buy_price,
                cash = agent.cash_balance,
                "bid exceeds cash balance; capping"
            );
            agent.cash_balance.max(0.0)
        } else {
            parsed.buy_price
        };

        spreads.push(AgentSpread {
            agent_id: agent.id,
            buy_price,
            sell_price: parsed.sell_price,
        });
    }

    store.store_spreads(goal.id, update_id, &spreads).await?;
    debug!(
        goal_id = goal.id,
        update_id,
        agents = agents.len(),
        replies = messages.len(),
        spreads = spreads.len(),
        "debate round complete"
    );

    Ok(DebateOutcome { messages, spreads })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{OracleMessage, ProviderHint};
    use crate::store::{MemoryBackend, MarketStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Oracle fake that answers from a per-agent script (keyed by the agent
    /// name embedded in the system prompt) and records every prompt it saw.
    struct ScriptedOracle {
        replies: HashMap<String, Option<String>>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedOracle {
        fn new(replies: Vec<(&str, Option<&str>)>) -> Self {
            Self {
                replies: replies
                    .into_iter()
                    .map(|(name, reply)| (name.to_string(), reply.map(|r| r.to_string())))
                    .collect(),
                seen: Mutex::new(Vec::new()),
            }
        }
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
                .join("\n---\n");
            self.seen.lock().push(transcript.clone());

            self.replies
                .iter()
                .find(|(name, _)| transcript.contains(name.as_str()))
                .and_then(|(_, reply)| reply.clone())
        }
    }

    async fn seed(store: &MarketStore) -> (Goal, Vec<Agent>) {
        let goal = Goal::new(1, "Ship the app (Measurement: app store link)".into(), "2026-12-01".into());
        store.save_goal(&goal).await.unwrap();

        let mut agents = Vec::new();
        for (id, name) in [(1u64, "Alice"), (2, "Bob"), (3, "Charlie")] {
            let agent = Agent::new(id, name.into(), 1000.0);
            store.save_agent(&agent).await.unwrap();
            agents.push(agent);
        }
        (goal, agents)
    }

    #[tokio::test]
    async fn failed_and_unparseable_agents_abstain() {
        let store = MarketStore::new(Arc::new(MemoryBackend::new()));
        let locks = AgentLocks::new();
        let (goal, agents) = seed(&store).await;

        let oracle = ScriptedOracle::new(vec![
            ("Alice", Some("Looks doable. <buy>$55.00</buy>")),
            ("Bob", None),                        // network failure
            ("Charlie", Some("no tags at all")),  // unusable reply
        ]);

        let outcome = run_debate(&store, &oracle, &locks, &goal, None, &[], &agents)
            .await
            .unwrap();

        // Two responses arrived, one spread parsed.
        assert_eq!(outcome.messages.len(), 2);
        assert_eq!(outcome.spreads.len(), 1);
        assert_eq!(outcome.spreads[0].agent_id, 1);
        assert_eq!(outcome.spreads[0].buy_price, 55.0);

        // Both the transcript and the spreads vector were persisted.
        assert_eq!(store.list_debate(1, 0).await.unwrap().len(), 2);
        assert_eq!(store.get_spreads(1, 0).await.unwrap(), outcome.spreads);

        // The memo holds the analysis prefix, not the tags.
        let alice = store.get_agent(1).await.unwrap().unwrap();
        assert_eq!(alice.memo(1), Some("Looks doable."));
    }

    #[tokio::test]
    async fn bids_are_capped_to_cash() {
        let store = MarketStore::new(Arc::new(MemoryBackend::new()));
        let locks = AgentLocks::new();
        let goal = Goal::new(1, "goal".into(), "2026-12-01".into());
        store.save_goal(&goal).await.unwrap();

        let poor = Agent::new(1, "Alice".into(), 50.0);
        store.save_agent(&poor).await.unwrap();

        let oracle = ScriptedOracle::new(vec![("Alice", Some("All in. <buy>$90.00</buy>"))]);
        let outcome = run_debate(&store, &oracle, &locks, &goal, None, &[], &[poor])
            .await
            .unwrap();

        assert_eq!(outcome.spreads[0].buy_price, 50.0);
    }

    #[tokio::test]
    async fn trading_round_prompts_carry_history_and_price() {
        let store = MarketStore::new(Arc::new(MemoryBackend::new()));
        let locks = AgentLocks::new();
        let (mut goal, agents) = seed(&store).await;
        goal.base_price = Some(65.0);
        store.save_goal(&goal).await.unwrap();

        let update = GoalUpdate {
            id: 1,
            goal_id: 1,
            content: "Beta build submitted".into(),
            date: "2026-09-01".into(),
            created_at: now_iso(),
        };
        let history = vec![update.clone()];

        let oracle = ScriptedOracle::new(vec![
            ("Alice", Some("Better odds now. <buy>$70.00</buy><sell>$82.00</sell>")),
            ("Bob", Some("Skeptical. <buy>$60.00</buy><sell>$75.00</sell>")),
            ("Charlie", Some("Bid only. <buy>$66.00</buy>")), // dropped: no ask
        ]);

        let outcome = run_debate(
            &store,
            &oracle,
            &locks,
            &goal,
            Some(&update),
            &history,
            &agents,
        )
        .await
        .unwrap();

        assert_eq!(outcome.spreads.len(), 2);
        assert!(outcome.spreads.iter().all(|s| s.sell_price.is_some()));

        for transcript in oracle.seen.lock().iter() {
            assert!(transcript.contains("Beta build submitted"));
            assert!(transcript.contains("CURRENT MARKET PRICE: $65.00"));
        }
    }
}
