//! Realized-performance tracking for applied recommendations.
//!
//! Metrics live in a process-scoped concurrent map keyed by portfolio id.
//! They are registered on apply, refreshed and pruned by [`PerformanceTracker::run_sweep`],
//! and never persisted. The sweep snapshots the key set first and performs
//! every store and price lookup without holding a map guard. Each entry
//! carries a registration stamp; the sweep only evicts or updates the entry
//! it read, so a concurrent re-registration is never clobbered.

use chrono::NaiveDate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::domain::config::TrackerConfig;
use crate::domain::error::EngineError;
use crate::domain::price::period_return_pct;
use crate::ports::portfolio_port::PortfolioStore;
use crate::ports::price_port::PriceHistoryPort;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationMetrics {
    pub application_date: NaiveDate,
    /// Fractions of 1 as applied.
    pub allocations: BTreeMap<String, f64>,
    pub initial_value: f64,
    pub latest_value: f64,
    pub latest_value_change: f64,
    pub latest_percentage_change: f64,
    pub days_since_application: i64,
    pub last_tracked_date: NaiveDate,
    #[serde(skip)]
    registration: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub updated: usize,
    pub evicted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub found: bool,
    pub application_date: Option<NaiveDate>,
    pub initial_value: Option<f64>,
    pub current_value: Option<f64>,
    pub percentage_change: Option<f64>,
    pub benchmark_return: Option<f64>,
    pub outperformance: Option<f64>,
}

impl PerformanceReport {
    pub fn not_found() -> Self {
        PerformanceReport::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub recommendation_count: usize,
    pub positive_performance_percentage: f64,
    pub average_performance: f64,
    pub best_performance: f64,
    pub worst_performance: f64,
}

#[derive(Debug)]
pub struct PerformanceTracker {
    metrics: DashMap<i64, RecommendationMetrics>,
    registrations: AtomicU64,
    benchmark_symbol: String,
    retention_days: i64,
}

impl PerformanceTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        PerformanceTracker {
            metrics: DashMap::new(),
            registrations: AtomicU64::new(0),
            benchmark_symbol: config.benchmark_symbol.clone(),
            retention_days: config.retention_days,
        }
    }

    pub fn benchmark_symbol(&self) -> &str {
        &self.benchmark_symbol
    }

    /// Start tracking `portfolio_id`, replacing any earlier entry.
    pub fn register(
        &self,
        portfolio_id: i64,
        allocations: BTreeMap<String, f64>,
        initial_value: f64,
        application_date: NaiveDate,
    ) {
        let metrics = RecommendationMetrics {
            application_date,
            allocations,
            initial_value,
            latest_value: initial_value,
            latest_value_change: 0.0,
            latest_percentage_change: 0.0,
            days_since_application: 0,
            last_tracked_date: application_date,
            registration: self.registrations.fetch_add(1, Ordering::Relaxed),
        };
        if self.metrics.insert(portfolio_id, metrics).is_some() {
            debug!(portfolio_id, "replaced tracked recommendation");
        }
    }

    pub fn get(&self, portfolio_id: i64) -> Option<RecommendationMetrics> {
        self.metrics.get(&portfolio_id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Refresh every tracked entry as of `today`, evicting those older than
    /// the retention window. Per-portfolio failures are logged and counted;
    /// the failing entry is kept.
    pub fn run_sweep(
        &self,
        portfolios: &dyn PortfolioStore,
        prices: &dyn PriceHistoryPort,
        today: NaiveDate,
    ) -> SweepSummary {
        let ids: Vec<i64> = self.metrics.iter().map(|entry| *entry.key()).collect();
        let mut summary = SweepSummary::default();

        for portfolio_id in ids {
            let Some((application_date, registration)) = self
                .metrics
                .get(&portfolio_id)
                .map(|m| (m.application_date, m.registration))
            else {
                continue;
            };
            let days = (today - application_date).num_days();

            if days > self.retention_days {
                if self
                    .metrics
                    .remove_if(&portfolio_id, |_, m| m.registration == registration)
                    .is_some()
                {
                    summary.evicted += 1;
                    debug!(portfolio_id, days, "evicted tracked recommendation");
                }
                continue;
            }

            match current_value(portfolios, prices, portfolio_id) {
                Ok(value) => match self.metrics.get_mut(&portfolio_id) {
                    Some(mut entry) if entry.registration == registration => {
                        let change = value - entry.initial_value;
                        entry.latest_value = value;
                        entry.latest_value_change = change;
                        entry.latest_percentage_change = if entry.initial_value != 0.0 {
                            change / entry.initial_value * 100.0
                        } else {
                            0.0
                        };
                        entry.days_since_application = days;
                        entry.last_tracked_date = today;
                        summary.updated += 1;
                    }
                    _ => debug!(portfolio_id, "tracked recommendation replaced during sweep"),
                },
                Err(e) => {
                    warn!(portfolio_id, error = %e, "performance sweep failed for portfolio");
                    summary.failed += 1;
                }
            }
        }

        info!(
            updated = summary.updated,
            evicted = summary.evicted,
            failed = summary.failed,
            "performance sweep finished"
        );
        summary
    }

    /// Latest tracked metrics for `portfolio_id` against the benchmark over
    /// the same window. An untracked portfolio yields `found = false`.
    pub fn get_performance(
        &self,
        portfolio_id: i64,
        prices: &dyn PriceHistoryPort,
        today: NaiveDate,
    ) -> PerformanceReport {
        let Some(metrics) = self.get(portfolio_id) else {
            return PerformanceReport::not_found();
        };

        let window_end = if metrics.last_tracked_date > metrics.application_date {
            metrics.last_tracked_date
        } else {
            today
        };
        let benchmark_return = match prices.fetch_prices(
            &self.benchmark_symbol,
            metrics.application_date,
            window_end,
        ) {
            Ok(bars) => period_return_pct(&bars),
            Err(e) => {
                warn!(symbol = %self.benchmark_symbol, error = %e, "benchmark history unavailable");
                None
            }
        };

        PerformanceReport {
            found: true,
            application_date: Some(metrics.application_date),
            initial_value: Some(metrics.initial_value),
            current_value: Some(metrics.latest_value),
            percentage_change: Some(metrics.latest_percentage_change),
            benchmark_return,
            outperformance: benchmark_return.map(|b| metrics.latest_percentage_change - b),
        }
    }

    pub fn aggregate_stats(&self) -> AggregateStats {
        let changes: Vec<f64> = self
            .metrics
            .iter()
            .map(|entry| entry.latest_percentage_change)
            .collect();
        if changes.is_empty() {
            return AggregateStats::default();
        }

        let count = changes.len();
        let positive = changes.iter().filter(|&&c| c > 0.0).count();
        AggregateStats {
            recommendation_count: count,
            positive_performance_percentage: positive as f64 / count as f64 * 100.0,
            average_performance: changes.iter().sum::<f64>() / count as f64,
            best_performance: changes.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            worst_performance: changes.iter().copied().fold(f64::INFINITY, f64::min),
        }
    }
}

/// Market value of the stored portfolio at the latest known prices. Symbols
/// without a quote keep their stored price.
fn current_value(
    portfolios: &dyn PortfolioStore,
    prices: &dyn PriceHistoryPort,
    portfolio_id: i64,
) -> Result<f64, EngineError> {
    let mut portfolio = portfolios
        .load_by_id(portfolio_id)?
        .ok_or(EngineError::PortfolioNotFound { portfolio_id })?;

    let mut quotes = HashMap::new();
    for symbol in portfolio.symbols() {
        match prices.latest_price(&symbol) {
            Ok(Some(price)) => {
                quotes.insert(symbol, price);
            }
            Ok(None) => {}
            Err(e) => warn!(%symbol, error = %e, "latest price lookup failed"),
        }
    }
    portfolio.reprice(&quotes);
    Ok(portfolio.total_value)
}
