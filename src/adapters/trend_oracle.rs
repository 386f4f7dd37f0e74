//! Deterministic prediction oracle: least-squares price trend.
//!
//! Fits a line through the closes of the last `historical_days` calendar days
//! of history and extrapolates it `prediction_horizon` days past the latest
//! bar. Confidence is the fit's R².

use crate::domain::config::OptimizerConfig;
use crate::domain::error::EngineError;
use crate::domain::indicator_service::MIN_INDICATOR_BARS;
use crate::domain::prediction::Prediction;
use crate::ports::oracle_port::PredictionOracle;
use crate::ports::price_port::PriceHistoryPort;
use chrono::Duration;
use std::sync::Arc;

pub struct TrendOracle {
    prices: Arc<dyn PriceHistoryPort>,
    historical_days: i64,
    horizon_days: i64,
}

/// Slope, intercept and R² of `points` as `(x, y)` pairs.
pub fn fit_line(points: &[(f64, f64)]) -> Option<(f64, f64, f64)> {
    let n = points.len() as f64;
    if points.len() < 2 {
        return None;
    }
    let x_mean = points.iter().map(|p| p.0).sum::<f64>() / n;
    let y_mean = points.iter().map(|p| p.1).sum::<f64>() / n;

    let mut ss_xy = 0.0;
    let mut ss_xx = 0.0;
    let mut ss_yy = 0.0;
    for &(x, y) in points {
        ss_xy += (x - x_mean) * (y - y_mean);
        ss_xx += (x - x_mean).powi(2);
        ss_yy += (y - y_mean).powi(2);
    }
    if ss_xx == 0.0 {
        return None;
    }

    let slope = ss_xy / ss_xx;
    let intercept = y_mean - slope * x_mean;
    let r_squared = if ss_yy == 0.0 {
        0.0
    } else {
        (ss_xy * ss_xy / (ss_xx * ss_yy)).clamp(0.0, 1.0)
    };
    Some((slope, intercept, r_squared))
}

impl TrendOracle {
    pub fn new(prices: Arc<dyn PriceHistoryPort>, historical_days: i64, horizon_days: i64) -> Self {
        Self {
            prices,
            historical_days,
            horizon_days,
        }
    }

    pub fn from_config(prices: Arc<dyn PriceHistoryPort>, config: &OptimizerConfig) -> Self {
        Self::new(prices, config.historical_days, config.prediction_horizon)
    }
}

impl PredictionOracle for TrendOracle {
    fn predict(&self, symbol: &str) -> Result<Prediction, EngineError> {
        let latest = self
            .prices
            .latest_bar(symbol)?
            .ok_or_else(|| EngineError::InsufficientData {
                symbol: symbol.to_string(),
                bars: 0,
                minimum: MIN_INDICATOR_BARS,
            })?;
        let start = latest.date - Duration::days(self.historical_days);
        let bars = self.prices.fetch_prices(symbol, start, latest.date)?;
        if bars.len() < MIN_INDICATOR_BARS {
            return Err(EngineError::InsufficientData {
                symbol: symbol.to_string(),
                bars: bars.len(),
                minimum: MIN_INDICATOR_BARS,
            });
        }

        let points: Vec<(f64, f64)> = bars
            .iter()
            .map(|b| ((b.date - start).num_days() as f64, b.close))
            .collect();
        let (slope, intercept, r_squared) =
            fit_line(&points).ok_or_else(|| EngineError::OracleUnavailable {
                reason: format!("no usable trend for {symbol}"),
            })?;

        let target_x = (latest.date - start).num_days() as f64 + self.horizon_days as f64;
        let predicted = (intercept + slope * target_x).max(0.0);

        Ok(Prediction::new(
            symbol,
            latest.date,
            self.horizon_days,
            latest.close,
            predicted,
            r_squared,
        ))
    }
}
