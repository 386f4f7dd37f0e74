//! Applying a target allocation to a stored portfolio.
//!
//! Application is all-or-nothing. Validation and every price lookup happen
//! before the portfolio is touched; a failed history append restores the
//! previously stored portfolio.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::{error, info};

use crate::domain::error::EngineError;
use crate::domain::history::{ChangeSource, ChangeType, HistoryRecord};
use crate::domain::portfolio::{Holding, Portfolio};
use crate::domain::tracker::PerformanceTracker;
use crate::ports::history_port::HistoryStore;
use crate::ports::portfolio_port::PortfolioStore;
use crate::ports::price_port::PriceHistoryPort;

/// Allowed drift of an applied allocation's sum from 1.
pub const APPLY_SUM_TOLERANCE: f64 = 0.01;
/// Share counts closer than this to the current holding are left unchanged.
pub const SHARE_EPSILON: f64 = 1e-6;

/// Weights must be finite fractions in [0, 1] summing to 1 within
/// [`APPLY_SUM_TOLERANCE`].
pub fn validate_allocations(allocations: &BTreeMap<String, f64>) -> Result<(), EngineError> {
    if allocations.is_empty() {
        return Err(EngineError::invalid_allocation("allocation is empty"));
    }
    for (symbol, weight) in allocations {
        if symbol.trim().is_empty() {
            return Err(EngineError::invalid_allocation("blank symbol in allocation"));
        }
        if !weight.is_finite() || !(0.0..=1.0).contains(weight) {
            return Err(EngineError::invalid_allocation(format!(
                "weight {weight} for {symbol} is outside [0, 1]"
            )));
        }
    }
    let sum: f64 = allocations.values().sum();
    if (sum - 1.0).abs() > APPLY_SUM_TOLERANCE {
        return Err(EngineError::invalid_allocation(format!(
            "weights sum to {sum:.4}, expected 1"
        )));
    }
    Ok(())
}

/// New holdings for `portfolio` matching `allocations` at `prices`.
///
/// Held symbols are marked to the supplied price first, so the target value
/// is the portfolio's current market value. Weights are scaled by their sum,
/// which keeps that value intact within the accepted sum tolerance. Symbols
/// with zero weight, or absent from `allocations`, are dropped. Buying more of a holding moves its
/// entry price to the share-weighted average.
pub fn rebalance_holdings(
    portfolio: &Portfolio,
    allocations: &BTreeMap<String, f64>,
    prices: &HashMap<String, f64>,
    entry_date: NaiveDate,
) -> Result<Portfolio, EngineError> {
    let mut marked = portfolio.clone();
    marked.reprice(prices);
    let total_value = marked.total_value;
    if total_value <= 0.0 {
        return Err(EngineError::invalid_allocation(format!(
            "portfolio {} has no market value to allocate",
            portfolio.id
        )));
    }

    let weight_sum: f64 = allocations.values().filter(|w| **w > 0.0).sum();
    if weight_sum <= 0.0 {
        return Err(EngineError::invalid_allocation("allocation has no positive weight"));
    }

    let mut stocks = Vec::new();
    for (symbol, &weight) in allocations {
        if weight <= 0.0 {
            continue;
        }
        let price = *prices.get(symbol).ok_or_else(|| EngineError::NoPrice {
            symbol: symbol.clone(),
        })?;
        let target_shares = weight / weight_sum * total_value / price;

        let holding = match marked.holding(symbol) {
            Some(existing) => {
                let mut holding = existing.clone();
                if (target_shares - existing.shares).abs() >= SHARE_EPSILON {
                    if target_shares > existing.shares {
                        let added = target_shares - existing.shares;
                        holding.entry_price =
                            (existing.cost_basis() + added * price) / target_shares;
                    }
                    holding.shares = target_shares;
                }
                holding
            }
            None => Holding::new(
                symbol.clone(),
                symbol.clone(),
                target_shares,
                price,
                entry_date,
                price,
            ),
        };
        stocks.push(holding);
    }

    marked.stocks = stocks;
    marked.recalculate();
    Ok(marked)
}

/// Applies allocations against the stores it borrows.
pub struct RecommendationApplier<'a> {
    pub portfolios: &'a dyn PortfolioStore,
    pub history: &'a dyn HistoryStore,
    pub prices: &'a dyn PriceHistoryPort,
    pub tracker: &'a PerformanceTracker,
    /// Recorded on the history entry.
    pub risk_tolerance: f64,
}

impl RecommendationApplier<'_> {
    pub fn apply(
        &self,
        portfolio_id: i64,
        allocations: &BTreeMap<String, f64>,
        now: DateTime<Utc>,
    ) -> Result<Portfolio, EngineError> {
        validate_allocations(allocations)?;

        let previous = self
            .portfolios
            .load_by_id(portfolio_id)?
            .ok_or(EngineError::PortfolioNotFound { portfolio_id })?;

        let mut prices = HashMap::new();
        for (symbol, &weight) in allocations {
            if weight <= 0.0 {
                continue;
            }
            let price = self
                .prices
                .latest_price(symbol)?
                .filter(|p| p.is_finite() && *p > 0.0)
                .ok_or_else(|| EngineError::NoPrice {
                    symbol: symbol.clone(),
                })?;
            prices.insert(symbol.clone(), price);
        }

        let mut updated = rebalance_holdings(&previous, allocations, &prices, now.date_naive())?;
        updated.mark_upgraded_with_ai(now);

        let saved = self
            .portfolios
            .save(&updated)
            .map_err(|e| EngineError::optimization_failed(portfolio_id, e.to_string()))?;

        let record = HistoryRecord::between(
            &previous,
            &saved,
            ChangeType::AiRecommendation,
            ChangeSource::Ai,
            self.risk_tolerance,
            now,
        );
        if let Err(e) = self.history.append(&record) {
            if let Err(restore) = self.portfolios.save(&previous) {
                error!(portfolio_id, error = %restore, "failed to restore portfolio after history failure");
            }
            return Err(EngineError::optimization_failed(
                portfolio_id,
                format!("history append failed: {e}"),
            ));
        }

        self.tracker.register(
            portfolio_id,
            saved.weight_fractions(),
            saved.total_value,
            now.date_naive(),
        );
        info!(
            portfolio_id,
            holdings = saved.stocks.len(),
            value = saved.total_value,
            "applied AI allocation"
        );
        Ok(saved)
    }
}
