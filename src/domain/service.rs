//! Orchestration of the optimization engine over its ports.
//!
//! [`UpgradeService`] owns the long-lived shared state (prediction cache,
//! performance tracker) and exposes the engine's produced operations. Every
//! oracle call and price lookup for a run happens before the portfolio is
//! moved to `Optimizing`.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::applier::RecommendationApplier;
use crate::domain::config::EngineConfig;
use crate::domain::error::EngineError;
use crate::domain::history::HistoryRecord;
use crate::domain::indicator_service;
use crate::domain::optimizer::{AllocationBounds, Candidate, desirability_score, optimize_weights};
use crate::domain::portfolio::{OptimizationStatus, Portfolio};
use crate::domain::prediction::{Prediction, PredictionCache, request_prediction};
use crate::domain::recommendation::{UpgradeRecommendation, build_actions};
use crate::domain::snapshot::IndicatorSnapshot;
use crate::domain::tracker::{AggregateStats, PerformanceReport, PerformanceTracker, SweepSummary};
use crate::domain::universe::{SkipReason, SkippedSymbol, expansion_pool, rank_expansion_candidates};
use crate::ports::history_port::HistoryStore;
use crate::ports::indicator_port::IndicatorStore;
use crate::ports::oracle_port::PredictionOracle;
use crate::ports::portfolio_port::PortfolioStore;
use crate::ports::price_port::PriceHistoryPort;

/// The collaborators an [`UpgradeService`] runs against.
#[derive(Clone)]
pub struct EnginePorts {
    pub prices: Arc<dyn PriceHistoryPort>,
    pub oracle: Arc<dyn PredictionOracle>,
    pub portfolios: Arc<dyn PortfolioStore>,
    pub history: Arc<dyn HistoryStore>,
    pub indicators: Arc<dyn IndicatorStore>,
}

pub struct UpgradeService {
    ports: EnginePorts,
    config: EngineConfig,
    tracker: Arc<PerformanceTracker>,
    cache: PredictionCache,
}

/// Scoring inputs gathered for one run.
struct GatheredSignals {
    candidates: Vec<Candidate>,
    prices: HashMap<String, f64>,
    omitted: Vec<SkippedSymbol>,
    universe_expanded: bool,
}

impl UpgradeService {
    pub fn new(ports: EnginePorts, config: EngineConfig) -> Self {
        let tracker = Arc::new(PerformanceTracker::new(&config.tracker));
        Self::with_tracker(ports, config, tracker)
    }

    /// Share an existing tracker, e.g. with a background sweep task.
    pub fn with_tracker(
        ports: EnginePorts,
        config: EngineConfig,
        tracker: Arc<PerformanceTracker>,
    ) -> Self {
        let cache = PredictionCache::from_minutes(config.optimizer.cache_timeout_minutes);
        UpgradeService {
            ports,
            config,
            tracker,
            cache,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tracker(&self) -> Arc<PerformanceTracker> {
        Arc::clone(&self.tracker)
    }

    pub fn prediction_cache(&self) -> &PredictionCache {
        &self.cache
    }

    /// Compute target weights and trades for `portfolio_id` without changing
    /// its holdings. `risk_tolerance` defaults to the configured value.
    pub fn generate_upgrade(
        &self,
        portfolio_id: i64,
        risk_tolerance: Option<f64>,
        expand_universe: bool,
        now: DateTime<Utc>,
    ) -> Result<UpgradeRecommendation, EngineError> {
        let risk_tolerance =
            risk_tolerance.unwrap_or(self.config.optimizer.default_risk_tolerance);
        if !risk_tolerance.is_finite() || !(0.0..=1.0).contains(&risk_tolerance) {
            return Err(EngineError::invalid_allocation(format!(
                "risk tolerance {risk_tolerance} is outside [0, 1]"
            )));
        }

        let mut portfolio = self.load(portfolio_id)?;
        let signals = self.gather_signals(&portfolio, risk_tolerance, expand_universe, now.date_naive());

        let previous_status = portfolio.optimization_status;
        portfolio.begin_optimization();
        self.ports
            .portfolios
            .save(&portfolio)
            .map_err(|e| EngineError::optimization_failed(portfolio_id, e.to_string()))?;

        let bounds = AllocationBounds::from_config(&self.config.optimizer);
        let weights = match optimize_weights(&signals.candidates, &bounds) {
            Ok(weights) => weights,
            Err(e) => {
                warn!(portfolio_id, error = %e, "optimization failed");
                self.restore_status(portfolio, previous_status);
                return Err(e);
            }
        };

        let recommended_actions = build_actions(&portfolio, &weights, &signals.prices);
        let mut optimized = portfolio.clone();
        optimized.mark_optimized(now);
        if let Err(e) = self.ports.portfolios.save(&optimized) {
            warn!(portfolio_id, error = %e, "failed to record optimized portfolio");
            self.restore_status(portfolio, previous_status);
            return Err(EngineError::optimization_failed(portfolio_id, e.to_string()));
        }

        info!(
            portfolio_id,
            symbols = weights.len(),
            omitted = signals.omitted.len(),
            risk_tolerance,
            "generated upgrade recommendation"
        );
        Ok(UpgradeRecommendation {
            portfolio_id,
            risk_tolerance,
            universe_expanded: signals.universe_expanded,
            recommended_allocations: weights.into_iter().collect(),
            recommended_actions,
            omitted: signals.omitted,
        })
    }

    /// Apply `allocations` (fractions) to the stored portfolio.
    pub fn apply_upgrade(
        &self,
        portfolio_id: i64,
        allocations: &BTreeMap<String, f64>,
        now: DateTime<Utc>,
    ) -> Result<Portfolio, EngineError> {
        let applier = RecommendationApplier {
            portfolios: self.ports.portfolios.as_ref(),
            history: self.ports.history.as_ref(),
            prices: self.ports.prices.as_ref(),
            tracker: &self.tracker,
            risk_tolerance: self.config.optimizer.default_risk_tolerance,
        };
        applier.apply(portfolio_id, allocations, now)
    }

    pub fn get_performance(&self, portfolio_id: i64, today: NaiveDate) -> PerformanceReport {
        self.tracker
            .get_performance(portfolio_id, self.ports.prices.as_ref(), today)
    }

    pub fn get_aggregate_stats(&self) -> AggregateStats {
        self.tracker.aggregate_stats()
    }

    pub fn run_sweep(&self, today: NaiveDate) -> SweepSummary {
        let purged = self.cache.purge_expired();
        if purged > 0 {
            info!(purged, "expired cached predictions");
        }
        self.tracker.run_sweep(
            self.ports.portfolios.as_ref(),
            self.ports.prices.as_ref(),
            today,
        )
    }

    pub fn compute_indicators(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<IndicatorSnapshot>, EngineError> {
        indicator_service::compute_indicators(
            self.ports.prices.as_ref(),
            self.ports.indicators.as_ref(),
            symbol,
            start_date,
            end_date,
        )
    }

    pub fn stored_indicators(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<IndicatorSnapshot>, EngineError> {
        indicator_service::stored_indicators(
            self.ports.indicators.as_ref(),
            symbol,
            start_date,
            end_date,
        )
    }

    /// Ask the oracle directly, bypassing and then refreshing the cache.
    /// Failures surface as `PredictionFailed`.
    pub fn predict(&self, symbol: &str) -> Result<Prediction, EngineError> {
        let prediction = request_prediction(self.ports.oracle.as_ref(), symbol)?;
        self.cache.insert(prediction.clone());
        Ok(prediction)
    }

    pub fn history(&self, portfolio_id: i64) -> Result<Vec<HistoryRecord>, EngineError> {
        self.ports.history.list_for_portfolio(portfolio_id)
    }

    pub fn portfolio(&self, portfolio_id: i64) -> Result<Portfolio, EngineError> {
        self.load(portfolio_id)
    }

    /// Best-effort save of `portfolio` with its pre-run status.
    fn restore_status(&self, mut portfolio: Portfolio, status: OptimizationStatus) {
        portfolio.optimization_status = status;
        if let Err(e) = self.ports.portfolios.save(&portfolio) {
            warn!(portfolio_id = portfolio.id, error = %e, "failed to restore optimization status");
        }
    }

    fn load(&self, portfolio_id: i64) -> Result<Portfolio, EngineError> {
        self.ports
            .portfolios
            .load_by_id(portfolio_id)?
            .ok_or(EngineError::PortfolioNotFound { portfolio_id })
    }

    fn cached_prediction(&self, symbol: &str) -> Option<Prediction> {
        match self.cache.get_or_fetch(symbol, self.ports.oracle.as_ref()) {
            Ok(prediction) => Some(prediction),
            Err(e) => {
                warn!(symbol, error = %e, "prediction unavailable");
                None
            }
        }
    }

    fn snapshot(&self, symbol: &str, today: NaiveDate) -> Option<IndicatorSnapshot> {
        match indicator_service::latest_snapshot(
            self.ports.prices.as_ref(),
            self.ports.indicators.as_ref(),
            symbol,
            today,
            self.config.optimizer.historical_days,
        ) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(symbol, error = %e, "indicator snapshot unavailable");
                None
            }
        }
    }

    fn gather_signals(
        &self,
        portfolio: &Portfolio,
        risk_tolerance: f64,
        expand_universe: bool,
        today: NaiveDate,
    ) -> GatheredSignals {
        let mut signals = GatheredSignals {
            candidates: Vec::new(),
            prices: HashMap::new(),
            omitted: Vec::new(),
            universe_expanded: false,
        };

        for holding in &portfolio.stocks {
            let symbol = holding.symbol.clone();
            let prediction = self.cached_prediction(&symbol);
            let snapshot = self.snapshot(&symbol, today);
            if let Some(snapshot) = &snapshot {
                signals.prices.insert(symbol.clone(), snapshot.price);
            }
            match (prediction, snapshot) {
                (Some(prediction), Some(snapshot)) => signals.candidates.push(Candidate::Scored {
                    score: desirability_score(&prediction, &snapshot, risk_tolerance),
                    symbol,
                }),
                (prediction, _) => {
                    let reason = if prediction.is_none() {
                        SkipReason::NoPrediction
                    } else {
                        SkipReason::NoSnapshot
                    };
                    info!(%symbol, %reason, "pinning holding at its current weight");
                    signals.candidates.push(Candidate::Pinned {
                        weight: holding.weight / 100.0,
                        symbol: symbol.clone(),
                    });
                    signals.omitted.push(SkippedSymbol {
                        symbol,
                        reason,
                        pinned: true,
                    });
                }
            }
        }

        if !(expand_universe && self.config.optimizer.enable_universe_expansion) {
            return signals;
        }
        signals.universe_expanded = true;

        let catalog = match self.ports.portfolios.find_symbols_across_all_data() {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(error = %e, "symbol catalog unavailable, skipping expansion");
                return signals;
            }
        };
        let held = portfolio.symbols();
        let mut predictions = Vec::new();
        for symbol in expansion_pool(&catalog, &held) {
            match self.cached_prediction(&symbol) {
                Some(prediction) => predictions.push(prediction),
                None => signals.omitted.push(SkippedSymbol {
                    symbol,
                    reason: SkipReason::NoPrediction,
                    pinned: false,
                }),
            }
        }

        for prediction in
            rank_expansion_candidates(predictions, self.config.optimizer.max_expansion_stocks)
        {
            let symbol = prediction.symbol.clone();
            match self.snapshot(&symbol, today) {
                Some(snapshot) => {
                    signals.prices.insert(symbol.clone(), snapshot.price);
                    signals.candidates.push(Candidate::Scored {
                        score: desirability_score(&prediction, &snapshot, risk_tolerance),
                        symbol,
                    });
                }
                None => signals.omitted.push(SkippedSymbol {
                    symbol,
                    reason: SkipReason::NoSnapshot,
                    pinned: false,
                }),
            }
        }

        signals
    }
}
