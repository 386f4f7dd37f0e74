//! Per-symbol price predictions and their short-lived cache.

use chrono::NaiveDate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::domain::error::EngineError;
use crate::ports::oracle_port::PredictionOracle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub symbol: String,
    pub prediction_date: NaiveDate,
    pub target_date: NaiveDate,
    pub current_price: f64,
    pub predicted_price: f64,
    pub predicted_change_percentage: f64,
    /// In [0, 1].
    pub confidence_score: f64,
    pub actual_price: Option<f64>,
    pub actual_change_percentage: Option<f64>,
    pub verified: bool,
}

impl Prediction {
    pub fn new(
        symbol: impl Into<String>,
        prediction_date: NaiveDate,
        horizon_days: i64,
        current_price: f64,
        predicted_price: f64,
        confidence_score: f64,
    ) -> Self {
        let predicted_change_percentage = if current_price != 0.0 {
            (predicted_price - current_price) / current_price * 100.0
        } else {
            0.0
        };
        Prediction {
            symbol: symbol.into(),
            prediction_date,
            target_date: prediction_date + chrono::Duration::days(horizon_days),
            current_price,
            predicted_price,
            predicted_change_percentage,
            confidence_score,
            actual_price: None,
            actual_change_percentage: None,
            verified: false,
        }
    }

    /// Confidence-weighted expected return as a fraction (0.05 = +5%).
    pub fn expected_return(&self) -> f64 {
        self.predicted_change_percentage / 100.0 * self.confidence_score
    }

    /// Record the realized price on the target date.
    pub fn verify(&mut self, actual_price: f64) {
        self.actual_price = Some(actual_price);
        self.actual_change_percentage = if self.current_price != 0.0 {
            Some((actual_price - self.current_price) / self.current_price * 100.0)
        } else {
            None
        };
        self.verified = true;
    }

    fn is_usable(&self) -> bool {
        self.current_price.is_finite()
            && self.predicted_price.is_finite()
            && self.predicted_change_percentage.is_finite()
            && (0.0..=1.0).contains(&self.confidence_score)
    }
}

/// Call the oracle directly. Any failure, including an unusable answer,
/// surfaces as `PredictionFailed` naming the symbol.
pub fn request_prediction(
    oracle: &dyn PredictionOracle,
    symbol: &str,
) -> Result<Prediction, EngineError> {
    let prediction = oracle
        .predict(symbol)
        .map_err(|e| EngineError::PredictionFailed {
            symbol: symbol.to_string(),
            source: Box::new(e),
        })?;

    if !prediction.is_usable() {
        return Err(EngineError::PredictionFailed {
            symbol: symbol.to_string(),
            source: Box::new(EngineError::OracleUnavailable {
                reason: "prediction has non-finite values or confidence outside [0, 1]".into(),
            }),
        });
    }

    Ok(prediction)
}

#[derive(Debug, Clone)]
struct CachedPrediction {
    prediction: Prediction,
    fetched_at: Instant,
}

/// Process-local prediction cache keyed by symbol.
///
/// Entries older than the timeout are treated as absent. Oracle calls never
/// run while a map guard is held.
#[derive(Debug)]
pub struct PredictionCache {
    entries: DashMap<String, CachedPrediction>,
    timeout: Duration,
}

impl PredictionCache {
    pub fn new(timeout: Duration) -> Self {
        PredictionCache {
            entries: DashMap::new(),
            timeout,
        }
    }

    pub fn from_minutes(minutes: u64) -> Self {
        Self::new(Duration::from_secs(minutes * 60))
    }

    pub fn get(&self, symbol: &str) -> Option<Prediction> {
        let entry = self.entries.get(symbol)?;
        if entry.fetched_at.elapsed() < self.timeout {
            Some(entry.prediction.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, prediction: Prediction) {
        self.entries.insert(
            prediction.symbol.clone(),
            CachedPrediction {
                prediction,
                fetched_at: Instant::now(),
            },
        );
    }

    pub fn get_or_fetch(
        &self,
        symbol: &str,
        oracle: &dyn PredictionOracle,
    ) -> Result<Prediction, EngineError> {
        if let Some(hit) = self.get(symbol) {
            return Ok(hit);
        }
        let prediction = request_prediction(oracle, symbol)?;
        self.insert(prediction.clone());
        Ok(prediction)
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let timeout = self.timeout;
        self.entries
            .retain(|_, cached| cached.fetched_at.elapsed() < timeout);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
