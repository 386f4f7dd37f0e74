//! Portfolio state, holdings, and the optimization status machine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Weight sums are checked to this tolerance, in percent.
pub const WEIGHT_SUM_TOLERANCE_PCT: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptimizationStatus {
    NotOptimized,
    Optimizing,
    Optimized,
    UpgradedWithAi,
}

impl OptimizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationStatus::NotOptimized => "NOT_OPTIMIZED",
            OptimizationStatus::Optimizing => "OPTIMIZING",
            OptimizationStatus::Optimized => "OPTIMIZED",
            OptimizationStatus::UpgradedWithAi => "UPGRADED_WITH_AI",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NOT_OPTIMIZED" => Some(OptimizationStatus::NotOptimized),
            "OPTIMIZING" => Some(OptimizationStatus::Optimizing),
            "OPTIMIZED" => Some(OptimizationStatus::Optimized),
            "UPGRADED_WITH_AI" => Some(OptimizationStatus::UpgradedWithAi),
            _ => None,
        }
    }

    /// Statuses under which holding weights must sum to 100.
    pub fn requires_full_allocation(&self) -> bool {
        matches!(
            self,
            OptimizationStatus::Optimized | OptimizationStatus::UpgradedWithAi
        )
    }
}

impl fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub company_name: String,
    pub shares: f64,
    pub entry_price: f64,
    pub entry_date: NaiveDate,
    pub current_price: f64,
    /// Percent of portfolio value, 0-100.
    pub weight: f64,
    pub return_value: f64,
    pub return_percentage: f64,
}

impl Holding {
    pub fn new(
        symbol: impl Into<String>,
        company_name: impl Into<String>,
        shares: f64,
        entry_price: f64,
        entry_date: NaiveDate,
        current_price: f64,
    ) -> Self {
        let mut holding = Holding {
            symbol: symbol.into(),
            company_name: company_name.into(),
            shares,
            entry_price,
            entry_date,
            current_price,
            weight: 0.0,
            return_value: 0.0,
            return_percentage: 0.0,
        };
        holding.refresh_returns();
        holding
    }

    pub fn market_value(&self) -> f64 {
        self.shares * self.current_price
    }

    pub fn cost_basis(&self) -> f64 {
        self.shares * self.entry_price
    }

    pub fn refresh_returns(&mut self) {
        self.return_value = (self.current_price - self.entry_price) * self.shares;
        self.return_percentage = if self.entry_price > 0.0 {
            (self.current_price - self.entry_price) / self.entry_price * 100.0
        } else {
            0.0
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub stocks: Vec<Holding>,
    pub total_value: f64,
    pub total_return: f64,
    pub total_return_percentage: f64,
    /// Concentration on a 0-100 scale: the sum of squared weight fractions
    /// times 100. A single holding scores 100.
    pub risk_score: f64,
    pub optimization_status: OptimizationStatus,
    pub last_optimized_at: Option<DateTime<Utc>>,
}

impl Portfolio {
    pub fn new(id: i64, user_id: i64, name: impl Into<String>, stocks: Vec<Holding>) -> Self {
        let mut portfolio = Portfolio {
            id,
            user_id,
            name: name.into(),
            stocks,
            total_value: 0.0,
            total_return: 0.0,
            total_return_percentage: 0.0,
            risk_score: 0.0,
            optimization_status: OptimizationStatus::NotOptimized,
            last_optimized_at: None,
        };
        portfolio.recalculate();
        portfolio
    }

    pub fn holding(&self, symbol: &str) -> Option<&Holding> {
        self.stocks.iter().find(|h| h.symbol == symbol)
    }

    pub fn has_holding(&self, symbol: &str) -> bool {
        self.holding(symbol).is_some()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.stocks.iter().map(|h| h.symbol.clone()).collect()
    }

    /// Recompute per-holding returns and weights, then portfolio totals, from
    /// shares and current prices.
    pub fn recalculate(&mut self) {
        for holding in &mut self.stocks {
            holding.refresh_returns();
        }

        let total_value: f64 = self.stocks.iter().map(Holding::market_value).sum();
        let cost_basis: f64 = self.stocks.iter().map(Holding::cost_basis).sum();

        for holding in &mut self.stocks {
            holding.weight = if total_value > 0.0 {
                holding.market_value() / total_value * 100.0
            } else {
                0.0
            };
        }

        self.total_value = total_value;
        self.risk_score = self
            .stocks
            .iter()
            .map(|h| (h.weight / 100.0).powi(2))
            .sum::<f64>()
            * 100.0;
        self.total_return = self.stocks.iter().map(|h| h.return_value).sum();
        self.total_return_percentage = if cost_basis > 0.0 {
            self.total_return / cost_basis * 100.0
        } else {
            0.0
        };
    }

    /// Current allocation as fractions of 1, keyed by symbol.
    pub fn weight_fractions(&self) -> BTreeMap<String, f64> {
        self.stocks
            .iter()
            .map(|h| (h.symbol.clone(), h.weight / 100.0))
            .collect()
    }

    /// Current allocation in percent, keyed by symbol.
    pub fn allocations(&self) -> BTreeMap<String, f64> {
        self.stocks
            .iter()
            .map(|h| (h.symbol.clone(), h.weight))
            .collect()
    }

    pub fn weight_sum(&self) -> f64 {
        self.stocks.iter().map(|h| h.weight).sum()
    }

    /// Weights sum to 100 whenever the status demands a full allocation.
    pub fn allocation_is_consistent(&self) -> bool {
        if !self.optimization_status.requires_full_allocation() || self.stocks.is_empty() {
            return true;
        }
        (self.weight_sum() - 100.0).abs() <= WEIGHT_SUM_TOLERANCE_PCT
    }

    /// Mark-to-market using `prices`; holdings without a quote keep their price.
    pub fn reprice(&mut self, prices: &HashMap<String, f64>) {
        for holding in &mut self.stocks {
            if let Some(&price) = prices.get(&holding.symbol) {
                holding.current_price = price;
            }
        }
        self.recalculate();
    }

    pub fn begin_optimization(&mut self) {
        self.optimization_status = OptimizationStatus::Optimizing;
    }

    pub fn mark_optimized(&mut self, at: DateTime<Utc>) {
        self.optimization_status = OptimizationStatus::Optimized;
        self.last_optimized_at = Some(at);
    }

    pub fn mark_upgraded_with_ai(&mut self, at: DateTime<Utc>) {
        self.optimization_status = OptimizationStatus::UpgradedWithAi;
        self.last_optimized_at = Some(at);
    }

    pub fn has_ai_recommendations(&self) -> bool {
        self.optimization_status == OptimizationStatus::UpgradedWithAi
    }

    pub fn last_ai_recommendation_date(&self) -> Option<DateTime<Utc>> {
        if self.has_ai_recommendations() {
            self.last_optimized_at
        } else {
            None
        }
    }
}
