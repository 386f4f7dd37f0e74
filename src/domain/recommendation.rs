//! Upgrade recommendations: target weights plus the trades that reach them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::domain::portfolio::Portfolio;
use crate::domain::universe::SkippedSymbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Buy => f.write_str("BUY"),
            ActionKind::Sell => f.write_str("SELL"),
            ActionKind::Hold => f.write_str("HOLD"),
        }
    }
}

/// Weights are fractions of 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedAction {
    pub action: ActionKind,
    pub symbol: String,
    pub current_weight: f64,
    pub target_weight: f64,
    pub share_delta: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeRecommendation {
    pub portfolio_id: i64,
    pub risk_tolerance: f64,
    pub universe_expanded: bool,
    pub recommended_allocations: BTreeMap<String, f64>,
    pub recommended_actions: Vec<RecommendedAction>,
    pub omitted: Vec<SkippedSymbol>,
}

/// Whole-share change needed to move `current_shares` to `target_weight` of
/// `total_value`, rounded toward zero.
pub fn share_delta(target_weight: f64, total_value: f64, price: f64, current_shares: f64) -> i64 {
    if price <= 0.0 || !price.is_finite() {
        return 0;
    }
    (target_weight * total_value / price - current_shares).trunc() as i64
}

/// One action per target, in target order, followed by a full sell for any
/// held symbol the targets leave out.
///
/// `prices` overrides a holding's stored price; targets with no price at all
/// get a zero share delta.
pub fn build_actions(
    portfolio: &Portfolio,
    targets: &[(String, f64)],
    prices: &HashMap<String, f64>,
) -> Vec<RecommendedAction> {
    let mut actions: Vec<RecommendedAction> = targets
        .iter()
        .map(|(symbol, target)| {
            let holding = portfolio.holding(symbol);
            let current_shares = holding.map_or(0.0, |h| h.shares);
            let price = prices
                .get(symbol)
                .copied()
                .or_else(|| holding.map(|h| h.current_price))
                .unwrap_or(0.0);
            let delta = share_delta(*target, portfolio.total_value, price, current_shares);
            RecommendedAction {
                action: action_for(delta),
                symbol: symbol.clone(),
                current_weight: holding.map_or(0.0, |h| h.weight / 100.0),
                target_weight: *target,
                share_delta: delta,
            }
        })
        .collect();

    for holding in &portfolio.stocks {
        if targets.iter().any(|(symbol, _)| *symbol == holding.symbol) {
            continue;
        }
        let delta = -(holding.shares.trunc() as i64);
        actions.push(RecommendedAction {
            action: action_for(delta),
            symbol: holding.symbol.clone(),
            current_weight: holding.weight / 100.0,
            target_weight: 0.0,
            share_delta: delta,
        });
    }

    actions
}

fn action_for(share_delta: i64) -> ActionKind {
    match share_delta {
        d if d > 0 => ActionKind::Buy,
        d if d < 0 => ActionKind::Sell,
        _ => ActionKind::Hold,
    }
}
