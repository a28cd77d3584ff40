//! Two-stage clearing.
//!
//! Stage 1 is a continuous double auction: best bid against best ask while
//! they cross, each match executing at the ask. Stage 2 is a uniform-price
//! fallback used only for initial auctions (no prior market price exists):
//! it scans candidate prices below the lowest ask for the one that crosses
//! the most volume, conceding reluctant sellers down to the clearing price
//! so a fresh market always discovers a reference mark. Matching is pure
//! CPU work; trade outcomes depend only on the set of spreads, not their
//! arrival order.

use std::cmp::Ordering;

use crate::models::AgentSpread;

/// Candidate price step for the uniform-price scan.
const PRICE_STEP: f64 = 0.05;

/// The scan floor sits just under the highest bid.
const SCAN_MARGIN: f64 = 0.01;

const EPS: f64 = 1e-9;

/// A match emitted by the clearing algorithm; settlement turns these into
/// persisted trades.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedTrade {
    pub buyer_agent_id: u64,
    pub seller_agent_id: u64,
    pub price: f64,
    pub quantity: f64,
}

/// Bids sorted best-first: price descending, ties broken by agent id.
fn ranked_bids(spreads: &[AgentSpread]) -> Vec<&AgentSpread> {
    let mut bids: Vec<&AgentSpread> = spreads.iter().collect();
    bids.sort_by(|a, b| {
        b.buy_price
            .partial_cmp(&a.buy_price)
            .unwrap_or(Ordering::Equal)
            .then(a.agent_id.cmp(&b.agent_id))
    });
    bids
}

/// Asks sorted best-first: price ascending, ties broken by agent id.
/// Spreads without a sell quote do not appear.
fn ranked_asks(spreads: &[AgentSpread]) -> Vec<(&AgentSpread, f64)> {
    let mut asks: Vec<(&AgentSpread, f64)> = spreads
        .iter()
        .filter_map(|s| s.sell_price.map(|p| (s, p)))
        .collect();
    asks.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(Ordering::Equal)
            .then(a.0.agent_id.cmp(&b.0.agent_id))
    });
    asks
}

/// Runs the event's clearing. `initial_auction` enables the stage-2
/// fallback (goal-creation events only).
pub fn match_spreads(spreads: &[AgentSpread], initial_auction: bool) -> Vec<MatchedTrade> {
    let trades = continuous_double_auction(spreads);
    if trades.is_empty() && initial_auction {
        return uniform_price_auction(spreads);
    }
    trades
}

/// Stage 1. Walks bids and asks best-first, emitting one-token trades at
/// the ask while the cross condition holds. The same agent may appear on
/// both sides; a self-match clears at the ask as a no-op transfer.
fn continuous_double_auction(spreads: &[AgentSpread]) -> Vec<MatchedTrade> {
    let bids = ranked_bids(spreads);
    let asks = ranked_asks(spreads);

    let mut trades = Vec::new();
    let mut i = 0;
    let mut j = 0;
    while i < bids.len() && j < asks.len() {
        let (ask_spread, ask_price) = asks[j];
        if bids[i].buy_price < ask_price {
            break;
        }
        trades.push(MatchedTrade {
            buyer_agent_id: bids[i].agent_id,
            seller_agent_id: ask_spread.agent_id,
            price: ask_price,
            quantity: 1.0,
        });
        i += 1;
        j += 1;
    }
    trades
}

/// Stage 2. Only meaningful when bids and asks do not overlap; scans from
/// the lowest ask down to just under the highest bid and clears everything
/// at the volume-maximizing price (first, i.e. highest, price wins ties).
fn uniform_price_auction(spreads: &[AgentSpread]) -> Vec<MatchedTrade> {
    let bids = ranked_bids(spreads);
    let asks = ranked_asks(spreads);
    if bids.is_empty() || asks.is_empty() {
        return Vec::new();
    }

    let highest_bid = bids[0].buy_price;
    let lowest_ask = asks[0].1;
    if highest_bid >= lowest_ask {
        // Overlapping quotes belong to stage 1.
        return Vec::new();
    }

    let floor = highest_bid - SCAN_MARGIN;
    let mut best_price = None;
    let mut best_volume = 0usize;
    let mut step = 0u32;
    loop {
        let p = lowest_ask - PRICE_STEP * f64::from(step);
        if p < floor - EPS {
            break;
        }
        let demand = bids.iter().filter(|s| s.buy_price >= p - EPS).count();
        let supply = asks.iter().filter(|(_, ask)| *ask >= p - EPS).count();
        let volume = demand.min(supply);
        if volume > best_volume {
            best_volume = volume;
            best_price = Some(p);
        }
        step += 1;
    }

    let Some(price) = best_price else {
        return Vec::new();
    };
    // The scan accumulates 0.05 steps; keep the recorded price at cents.
    let price = (price * 100.0).round() / 100.0;

    bids.iter()
        .zip(asks.iter())
        .take(best_volume)
        .map(|(bid, (ask, _))| MatchedTrade {
            buyer_agent_id: bid.agent_id,
            seller_agent_id: ask.agent_id,
            price,
            quantity: 1.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spread(agent_id: u64, buy: f64, sell: Option<f64>) -> AgentSpread {
        AgentSpread {
            agent_id,
            buy_price: buy,
            sell_price: sell,
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn overlapping_spreads_clear_at_the_ask() {
        // A buy=70 sell=95; B buy=60 sell=80; C buy=50 sell=65.
        let spreads = vec![
            spread(1, 70.0, Some(95.0)),
            spread(2, 60.0, Some(80.0)),
            spread(3, 50.0, Some(65.0)),
        ];

        let trades = match_spreads(&spreads, true);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].buyer_agent_id, 1);
        assert_eq!(trades[0].seller_agent_id, 3);
        assert!(approx(trades[0].price, 65.0));
        assert_eq!(trades[0].quantity, 1.0);
    }

    #[test]
    fn no_overlap_falls_back_to_uniform_price_on_initial_event() {
        // A buy=40 sell=90; B buy=30 sell=80; C buy=20 sell=70.
        let spreads = vec![
            spread(1, 40.0, Some(90.0)),
            spread(2, 30.0, Some(80.0)),
            spread(3, 20.0, Some(70.0)),
        ];

        let trades = match_spreads(&spreads, true);
        assert_eq!(trades.len(), 1);
        // Best remaining buyer is A; best (lowest) ask belongs to C.
        assert_eq!(trades[0].buyer_agent_id, 1);
        assert_eq!(trades[0].seller_agent_id, 3);
        assert!(approx(trades[0].price, 40.0));
    }

    #[test]
    fn fallback_is_disabled_after_the_initial_event() {
        let spreads = vec![
            spread(1, 40.0, Some(90.0)),
            spread(2, 30.0, Some(80.0)),
        ];
        assert!(match_spreads(&spreads, false).is_empty());
    }

    #[test]
    fn fallback_volume_is_capped_by_the_thinner_side() {
        // Two willing bidders at 50, but only one quoted ask.
        let spreads = vec![
            spread(1, 50.0, None),
            spread(2, 50.0, None),
            spread(3, 10.0, Some(60.0)),
        ];
        let trades = match_spreads(&spreads, true);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].buyer_agent_id, 1);
        assert_eq!(trades[0].seller_agent_id, 3);
        assert!(approx(trades[0].price, 50.0));
    }

    #[test]
    fn self_match_is_permitted_and_clears_at_the_ask() {
        let spreads = vec![
            spread(1, 80.0, Some(60.0)),
            spread(2, 50.0, Some(90.0)),
        ];
        let trades = match_spreads(&spreads, false);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].buyer_agent_id, 1);
        assert_eq!(trades[0].seller_agent_id, 1);
        assert!(approx(trades[0].price, 60.0));
    }

    #[test]
    fn stage_one_ties_break_by_agent_id() {
        let spreads = vec![
            spread(5, 70.0, Some(65.0)),
            spread(2, 70.0, Some(65.0)),
        ];
        let trades = match_spreads(&spreads, false);
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].buyer_agent_id, 2);
        assert_eq!(trades[0].seller_agent_id, 2);
        assert_eq!(trades[1].buyer_agent_id, 5);
        assert_eq!(trades[1].seller_agent_id, 5);
    }

    #[test]
    fn bid_only_round_yields_no_trades() {
        let spreads = vec![spread(1, 40.0, None), spread(2, 35.0, None)];
        assert!(match_spreads(&spreads, true).is_empty());
    }

    #[test]
    fn empty_round_yields_no_trades() {
        assert!(match_spreads(&[], true).is_empty());
    }

    #[test]
    fn stage_one_trades_satisfy_the_cross_invariant() {
        let spreads = vec![
            spread(1, 90.0, Some(40.0)),
            spread(2, 75.0, Some(55.0)),
            spread(3, 60.0, Some(70.0)),
            spread(4, 20.0, Some(85.0)),
        ];
        let trades = match_spreads(&spreads, false);
        assert!(!trades.is_empty());

        let by_agent = |id: u64| spreads.iter().find(|s| s.agent_id == id).unwrap();
        for t in &trades {
            let buyer = by_agent(t.buyer_agent_id);
            let seller = by_agent(t.seller_agent_id);
            assert!(buyer.buy_price >= seller.sell_price.unwrap());
            assert!(approx(t.price, seller.sell_price.unwrap()));
        }
    }
}
