//! Settlement engine.
//!
//! The only mutator of agent cash and holdings during trading. Each match
//! is applied as one short critical section per agent pair: load, move
//! cash, move tokens, save, record the trade. After the batch it marks the
//! goal with the discovered price (the mean of the event's trade prices),
//! refreshes the goal's outstanding token supply, and appends a history
//! entry for every quoted spread, traded or not.

use anyhow::{anyhow, Result};
use tracing::info;

use crate::market::locks::AgentLocks;
use crate::market::matching::MatchedTrade;
use crate::models::{now_iso, AgentHistoryEntry, AgentSpread, Trade};
use crate::store::gateway::IdNamespace;
use crate::store::MarketStore;

pub struct SettlementReport {
    pub trades: Vec<Trade>,
    pub market_price: Option<f64>,
}

pub async fn settle_event(
    store: &MarketStore,
    agent_locks: &AgentLocks,
    goal_id: u64,
    update_id: u64,
    matched: &[MatchedTrade],
    spreads: &[AgentSpread],
) -> Result<SettlementReport> {
    let mut trades = Vec::with_capacity(matched.len());

    for m in matched {
        apply_transfer(store, agent_locks, goal_id, m).await?;

        let trade = Trade {
            id: store.next_id(IdNamespace::Trade).await?,
            goal_id,
            update_id,
            buyer_agent_id: m.buyer_agent_id,
            seller_agent_id: m.seller_agent_id,
            price: m.price,
            quantity: m.quantity,
            created_at: now_iso(),
        };
        store.append_trade(&trade).await?;
        trades.push(trade);
    }

    let market_price = if trades.is_empty() {
        None
    } else {
        Some(trades.iter().map(|t| t.price).sum::<f64>() / trades.len() as f64)
    };

    if let Some(price) = market_price {
        let mut goal = store
            .get_goal(goal_id)
            .await?
            .ok_or_else(|| anyhow!("goal {goal_id} vanished during settlement"))?;
        goal.base_price = Some(price);
        store.save_goal(&goal).await?;

        let supply: f64 = store
            .list_agents()
            .await?
            .iter()
            .map(|a| a.holding(goal_id).max(0.0))
            .sum();
        store.set_token_supply(goal_id, supply).await?;

        info!(
            goal_id,
            update_id,
            trades = trades.len(),
            market_price = price,
            "💱 event settled"
        );
    }

    for spread in spreads {
        let entry = AgentHistoryEntry {
            goal_id,
            update_id,
            buy_price: spread.buy_price,
            sell_price: spread.sell_price,
            market_price,
            created_at: now_iso(),
        };
        store.append_agent_history(spread.agent_id, &entry).await?;
    }

    Ok(SettlementReport {
        trades,
        market_price,
    })
}

/// Moves cash and tokens for one match under the participants' locks.
/// A self-match loads the agent once; the transfer nets to zero.
async fn apply_transfer(
    store: &MarketStore,
    agent_locks: &AgentLocks,
    goal_id: u64,
    m: &MatchedTrade,
) -> Result<()> {
    let (first, second) = agent_locks.for_pair(m.buyer_agent_id, m.seller_agent_id);
    let _first_guard = first.lock().await;
    let _second_guard = match &second {
        Some(lock) => Some(lock.lock().await),
        None => None,
    };

    let notional = m.price * m.quantity;

    if m.buyer_agent_id == m.seller_agent_id {
        let agent = store
            .get_agent(m.buyer_agent_id)
            .await?
            .ok_or_else(|| anyhow!("agent {} vanished during settlement", m.buyer_agent_id))?;
        // Cash and tokens cancel out for a self-match.
        store.save_agent(&agent).await?;
        return Ok(());
    }

    let mut buyer = store
        .get_agent(m.buyer_agent_id)
        .await?
        .ok_or_else(|| anyhow!("buyer {} vanished during settlement", m.buyer_agent_id))?;
    let mut seller = store
        .get_agent(m.seller_agent_id)
        .await?
        .ok_or_else(|| anyhow!("seller {} vanished during settlement", m.seller_agent_id))?;

    buyer.cash_balance -= notional;
    seller.cash_balance += notional;
    buyer.add_holding(goal_id, m.quantity);
    seller.add_holding(goal_id, -m.quantity);

    store.save_agent(&buyer).await?;
    store.save_agent(&seller).await?;
    Ok(())
}
