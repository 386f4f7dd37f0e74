//! Engine configuration: typed tunables read through [`ConfigPort`] and
//! validated before any run.
//!
//! ```ini
//! [optimizer]
//! historical_days = 365
//! prediction_horizon = 30
//! max_stock_allocation = 0.35
//! min_stock_allocation = 0.01
//! optimization_iterations = 1000
//! default_risk_tolerance = 0.5
//! enable_universe_expansion = true
//! max_expansion_stocks = 5
//! cache_timeout_minutes = 60
//!
//! [tracker]
//! benchmark_symbol = SPY
//! retention_days = 180
//! sweep_interval_hours = 168
//! ```

use crate::domain::error::EngineError;
use crate::ports::config_port::ConfigPort;

const OPTIMIZER: &str = "optimizer";
const TRACKER: &str = "tracker";

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    pub historical_days: i64,
    pub prediction_horizon: i64,
    pub max_stock_allocation: f64,
    pub min_stock_allocation: f64,
    pub optimization_iterations: usize,
    pub default_risk_tolerance: f64,
    pub enable_universe_expansion: bool,
    pub max_expansion_stocks: usize,
    pub cache_timeout_minutes: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            historical_days: 365,
            prediction_horizon: 30,
            max_stock_allocation: 0.35,
            min_stock_allocation: 0.01,
            optimization_iterations: 1000,
            default_risk_tolerance: 0.5,
            enable_universe_expansion: true,
            max_expansion_stocks: 5,
            cache_timeout_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub benchmark_symbol: String,
    pub retention_days: i64,
    pub sweep_interval_hours: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            benchmark_symbol: "SPY".to_string(),
            retention_days: 180,
            sweep_interval_hours: 24 * 7,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub optimizer: OptimizerConfig,
    pub tracker: TrackerConfig,
}

pub fn load_engine_config(config: &dyn ConfigPort) -> Result<EngineConfig, EngineError> {
    let defaults = EngineConfig::default();
    let o = &defaults.optimizer;
    let t = &defaults.tracker;

    let optimizer = OptimizerConfig {
        historical_days: config.get_int(OPTIMIZER, "historical_days", o.historical_days),
        prediction_horizon: config.get_int(OPTIMIZER, "prediction_horizon", o.prediction_horizon),
        max_stock_allocation: config.get_double(
            OPTIMIZER,
            "max_stock_allocation",
            o.max_stock_allocation,
        ),
        min_stock_allocation: config.get_double(
            OPTIMIZER,
            "min_stock_allocation",
            o.min_stock_allocation,
        ),
        optimization_iterations: non_negative(
            config,
            OPTIMIZER,
            "optimization_iterations",
            o.optimization_iterations as i64,
        )?,
        default_risk_tolerance: config.get_double(
            OPTIMIZER,
            "default_risk_tolerance",
            o.default_risk_tolerance,
        ),
        enable_universe_expansion: config.get_bool(
            OPTIMIZER,
            "enable_universe_expansion",
            o.enable_universe_expansion,
        ),
        max_expansion_stocks: non_negative(
            config,
            OPTIMIZER,
            "max_expansion_stocks",
            o.max_expansion_stocks as i64,
        )?,
        cache_timeout_minutes: non_negative(
            config,
            OPTIMIZER,
            "cache_timeout_minutes",
            o.cache_timeout_minutes as i64,
        )? as u64,
    };

    let tracker = TrackerConfig {
        benchmark_symbol: config
            .get_string(TRACKER, "benchmark_symbol")
            .map(|s| s.trim().to_uppercase())
            .unwrap_or_else(|| t.benchmark_symbol.clone()),
        retention_days: config.get_int(TRACKER, "retention_days", t.retention_days),
        sweep_interval_hours: non_negative(
            config,
            TRACKER,
            "sweep_interval_hours",
            t.sweep_interval_hours as i64,
        )? as u64,
    };

    let engine = EngineConfig { optimizer, tracker };
    validate_engine_config(&engine)?;
    Ok(engine)
}

pub fn validate_engine_config(config: &EngineConfig) -> Result<(), EngineError> {
    validate_windows(&config.optimizer)?;
    validate_allocation_bounds(&config.optimizer)?;
    validate_iterations(&config.optimizer)?;
    validate_risk_tolerance(&config.optimizer)?;
    validate_tracker(&config.tracker)?;
    Ok(())
}

fn invalid(section: &str, key: &str, reason: &str) -> EngineError {
    EngineError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn non_negative(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
) -> Result<usize, EngineError> {
    let value = config.get_int(section, key, default);
    usize::try_from(value).map_err(|_| invalid(section, key, &format!("{key} must be non-negative")))
}

fn validate_windows(config: &OptimizerConfig) -> Result<(), EngineError> {
    if config.historical_days <= 0 {
        return Err(invalid(
            OPTIMIZER,
            "historical_days",
            "historical_days must be positive",
        ));
    }
    if config.prediction_horizon <= 0 {
        return Err(invalid(
            OPTIMIZER,
            "prediction_horizon",
            "prediction_horizon must be positive",
        ));
    }
    Ok(())
}

fn validate_allocation_bounds(config: &OptimizerConfig) -> Result<(), EngineError> {
    let min = config.min_stock_allocation;
    let max = config.max_stock_allocation;
    if !(0.0..1.0).contains(&min) {
        return Err(invalid(
            OPTIMIZER,
            "min_stock_allocation",
            "min_stock_allocation must be in [0, 1)",
        ));
    }
    if !(max > 0.0 && max <= 1.0) {
        return Err(invalid(
            OPTIMIZER,
            "max_stock_allocation",
            "max_stock_allocation must be in (0, 1]",
        ));
    }
    if min > max {
        return Err(invalid(
            OPTIMIZER,
            "min_stock_allocation",
            "min_stock_allocation must not exceed max_stock_allocation",
        ));
    }
    Ok(())
}

fn validate_iterations(config: &OptimizerConfig) -> Result<(), EngineError> {
    if config.optimization_iterations == 0 {
        return Err(invalid(
            OPTIMIZER,
            "optimization_iterations",
            "optimization_iterations must be at least 1",
        ));
    }
    Ok(())
}

fn validate_risk_tolerance(config: &OptimizerConfig) -> Result<(), EngineError> {
    if !(0.0..=1.0).contains(&config.default_risk_tolerance) {
        return Err(invalid(
            OPTIMIZER,
            "default_risk_tolerance",
            "default_risk_tolerance must be between 0 and 1",
        ));
    }
    Ok(())
}

fn validate_tracker(config: &TrackerConfig) -> Result<(), EngineError> {
    if config.benchmark_symbol.is_empty() {
        return Err(EngineError::ConfigMissing {
            section: TRACKER.to_string(),
            key: "benchmark_symbol".to_string(),
        });
    }
    if config.retention_days <= 0 {
        return Err(invalid(
            TRACKER,
            "retention_days",
            "retention_days must be positive",
        ));
    }
    if config.sweep_interval_hours == 0 {
        return Err(invalid(
            TRACKER,
            "sweep_interval_hours",
            "sweep_interval_hours must be positive",
        ));
    }
    Ok(())
}
