//! Prompt builder for the two debate modes.
//!
//! Auction mode (goal creation) asks for an analysis paragraph and a single
//! bid; trading mode (a progress update arrived) additionally supplies the
//! full update history, the current market price, and the agent's prior
//! analysis, and asks for a bid and an ask. "Today" is the wall-clock date
//! for auctions and the update's reporting date for trading rounds, so
//! agents reason at the time the update was filed.

use crate::models::{Agent, Goal, GoalUpdate, PAYOUT_AMOUNT};
use crate::oracle::OracleMessage;

fn system_prompt(agent: &Agent) -> String {
    format!(
        "You are {name}, an autonomous trading agent in a prediction market for personal goals. \
         Each success token pays ${payout:.0} if the goal is achieved by its target date and $0 \
         otherwise. You trade against other agents; quote prices that reflect your honest \
         probability estimate and your portfolio constraints.",
        name = agent.name,
        payout = PAYOUT_AMOUNT,
    )
}

fn portfolio_block(agent: &Agent, goal_id: u64) -> String {
    let mut lines = vec![format!("Cash balance: ${:.2}", agent.cash_balance)];

    let mut longs: Vec<(&String, &f64)> =
        agent.holdings.iter().filter(|(_, v)| **v > 0.0).collect();
    longs.sort_by(|a, b| a.0.cmp(b.0));
    for (gid, tokens) in longs {
        lines.push(format!(
            "Long {tokens:.1} tokens on goal {gid} (value if success: ${:.2})",
            tokens * PAYOUT_AMOUNT
        ));
    }

    let mut shorts: Vec<(&String, &f64)> =
        agent.holdings.iter().filter(|(_, v)| **v < 0.0).collect();
    shorts.sort_by(|a, b| a.0.cmp(b.0));
    for (gid, tokens) in shorts {
        lines.push(format!(
            "Short {:.1} tokens on goal {gid} (liability if success: ${:.2})",
            -tokens,
            -tokens * PAYOUT_AMOUNT
        ));
    }

    lines.push(format!("Net worth: ${:.2}", agent.net_worth()));
    lines.push(format!(
        "Your current position on this goal: {:.1} tokens",
        agent.holding(goal_id)
    ));
    lines.join("\n")
}

fn goal_block(goal: &Goal, today: &str) -> String {
    format!(
        "GOAL: {desc}\nTARGET DATE: {target}\nTODAY: {today}\nTOKEN PAYOUT: ${payout:.0} on success, $0 on failure",
        desc = goal.description,
        target = goal.target_date,
        payout = PAYOUT_AMOUNT,
    )
}

/// Initial price-discovery prompt for a newly created goal.
pub fn auction_messages(goal: &Goal, agent: &Agent, today: &str) -> Vec<OracleMessage> {
    let user = format!(
        "{goal}\n\nPROGRESS UPDATES: none yet; the goal was just created.\n\n\
         YOUR PORTFOLIO:\n{portfolio}\n\n\
         This is the opening auction for this goal. Decide the highest price you would pay \
         for one success token. Reply with a short analysis paragraph, then end with exactly \
         one tag in this form: <buy>$X.XX</buy>",
        goal = goal_block(goal, today),
        portfolio = portfolio_block(agent, goal.id),
    );

    vec![OracleMessage::system(system_prompt(agent)), OracleMessage::user(user)]
}

/// Trading-round prompt after a progress update. `updates_asc` is the full
/// chronological history, oldest first, including `update` itself.
pub fn trading_messages(
    goal: &Goal,
    agent: &Agent,
    updates_asc: &[GoalUpdate],
    update: &GoalUpdate,
    market_price: Option<f64>,
    prior_analysis: Option<&str>,
) -> Vec<OracleMessage> {
    let mut history = String::new();
    for u in updates_asc {
        history.push_str(&format!("[{}] {}\n", u.date, u.content));
    }
    if history.is_empty() {
        history.push_str("none recorded\n");
    }

    let price_line = match market_price {
        Some(p) => format!("CURRENT MARKET PRICE: ${p:.2}"),
        None => "CURRENT MARKET PRICE: not yet discovered".to_string(),
    };

    let prior_block = match prior_analysis {
        Some(prior) => format!("YOUR PRIOR ANALYSIS OF THIS GOAL:\n{prior}\n\n"),
        None => String::new(),
    };

    let user = format!(
        "{goal}\n\nPROGRESS UPDATES (oldest first):\n{history}\n{price_line}\n\n\
         {prior_block}YOUR PORTFOLIO:\n{portfolio}\n\n\
         A new update just arrived (dated {update_date}). Re-evaluate the goal's chances. \
         Reply with a short analysis paragraph, then end with exactly two tags in this form: \
         <buy>$X.XX</buy> then <sell>$Y.YY</sell>, where the buy price is the most you would \
         pay for one token and the sell price is the least you would accept for one.",
        goal = goal_block(goal, &update.date),
        portfolio = portfolio_block(agent, goal.id),
        update_date = update.date,
    );

    vec![OracleMessage::system(system_prompt(agent)), OracleMessage::user(user)]
}
