//! Allocation optimizer: desirability scoring and the bounded weight search.
//!
//! Scores blend a confidence-weighted predicted return with indicator-derived
//! stability and momentum, mixed by risk tolerance. Weights start
//! proportional to score and are refined by repeated clamp-and-redistribute
//! passes until they settle or the pass budget runs out.

use tracing::debug;

use crate::domain::config::OptimizerConfig;
use crate::domain::error::EngineError;
use crate::domain::prediction::Prediction;
use crate::domain::snapshot::IndicatorSnapshot;

/// A pass whose largest per-symbol change is below this has converged.
pub const CONVERGENCE_EPSILON: f64 = 1e-9;
/// Allowed drift of the final weight sum from 1 and of weights past a bound.
pub const SUM_TOLERANCE: f64 = 1e-6;
const MIN_SCORE: f64 = 1e-6;
/// Steepness of the predicted-return squashing curve.
const RETURN_SENSITIVITY: f64 = 5.0;
const VOLATILITY_SENSITIVITY: f64 = 10.0;
const NEUTRAL: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationBounds {
    pub min: f64,
    pub max: f64,
    pub iterations: usize,
}

impl AllocationBounds {
    pub fn from_config(config: &OptimizerConfig) -> Self {
        AllocationBounds {
            min: config.min_stock_allocation,
            max: config.max_stock_allocation,
            iterations: config.optimization_iterations,
        }
    }
}

/// One symbol entering the weight search.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    /// Free to move, weighted by desirability score.
    Scored { symbol: String, score: f64 },
    /// Held symbol that could not be scored; keeps its previous fraction.
    Pinned { symbol: String, weight: f64 },
}

impl Candidate {
    pub fn symbol(&self) -> &str {
        match self {
            Candidate::Scored { symbol, .. } | Candidate::Pinned { symbol, .. } => symbol,
        }
    }
}

/// Desirability in (0, 1]. Non-decreasing in predicted return for fixed
/// indicators and confidence.
pub fn desirability_score(
    prediction: &Prediction,
    snapshot: &IndicatorSnapshot,
    risk_tolerance: f64,
) -> f64 {
    let rt = risk_tolerance.clamp(0.0, 1.0);
    let aggressive = 0.5 * (1.0 + (RETURN_SENSITIVITY * prediction.expected_return()).tanh());
    let conservative = 0.5 * stability_signal(snapshot) + 0.5 * momentum_signal(snapshot);
    (rt * aggressive + (1.0 - rt) * conservative).max(MIN_SCORE)
}

/// Trend and MACD direction mapped into [0, 1]; 0.5 when flat or unknown.
pub fn momentum_signal(snapshot: &IndicatorSnapshot) -> f64 {
    let cross = match (snapshot.sma20, snapshot.sma50) {
        (Some(fast), Some(slow)) => sign(fast - slow),
        _ => 0.0,
    };
    let long_term = snapshot
        .sma200
        .map_or(0.0, |sma| 0.5 * sign(snapshot.price - sma));
    let trend = (cross + long_term).clamp(-1.0, 1.0);
    let macd = snapshot.macd_histogram.map_or(0.0, sign);
    0.5 * (1.0 + 0.5 * (trend + macd))
}

/// Mean of RSI neutrality, band centering and low band width, each in
/// [0, 1]. Missing inputs count as neutral.
pub fn stability_signal(snapshot: &IndicatorSnapshot) -> f64 {
    let rsi = snapshot
        .rsi14
        .map_or(NEUTRAL, |rsi| 1.0 - (rsi - 50.0).abs() / 50.0);
    let band = snapshot
        .band_position()
        .map_or(NEUTRAL, |pos| (1.0 - 2.0 * (pos - 0.5).abs()).clamp(0.0, 1.0));
    let volatility = snapshot
        .relative_band_width()
        .map_or(NEUTRAL, |width| 1.0 / (1.0 + VOLATILITY_SENSITIVITY * width.max(0.0)));
    (rsi + band + volatility) / 3.0
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Target fraction per candidate, in candidate order.
///
/// Every weight lands in `[bounds.min, bounds.max]` and the weights sum to 1
/// within [`SUM_TOLERANCE`], or the call fails with `InvalidAllocation`.
pub fn optimize_weights(
    candidates: &[Candidate],
    bounds: &AllocationBounds,
) -> Result<Vec<(String, f64)>, EngineError> {
    if candidates.is_empty() {
        return Err(EngineError::invalid_allocation("no candidate symbols"));
    }
    let (min, max) = (bounds.min, bounds.max);

    let mut weights = vec![0.0; candidates.len()];
    let mut scores = vec![0.0; candidates.len()];
    let mut free = Vec::new();
    let mut pinned_sum = 0.0;
    for (i, candidate) in candidates.iter().enumerate() {
        match candidate {
            Candidate::Pinned { weight, .. } => {
                weights[i] = weight.clamp(min, max);
                pinned_sum += weights[i];
            }
            Candidate::Scored { score, .. } => {
                scores[i] = if score.is_finite() {
                    score.max(MIN_SCORE)
                } else {
                    MIN_SCORE
                };
                free.push(i);
            }
        }
    }

    let budget = 1.0 - pinned_sum;
    if free.is_empty() {
        if budget.abs() > SUM_TOLERANCE {
            return Err(EngineError::invalid_allocation(format!(
                "pinned holdings sum to {pinned_sum:.4} and no symbol can absorb the difference"
            )));
        }
        return Ok(labelled(candidates, &weights));
    }

    let n = free.len() as f64;
    if n * min > budget + SUM_TOLERANCE {
        return Err(EngineError::invalid_allocation(format!(
            "{} symbols at minimum {min} exceed the available budget {budget:.4}",
            free.len()
        )));
    }
    if n * max < budget - SUM_TOLERANCE {
        return Err(EngineError::invalid_allocation(format!(
            "{} symbols at maximum {max} cannot reach the available budget {budget:.4}",
            free.len()
        )));
    }

    let total_score: f64 = free.iter().map(|&i| scores[i]).sum();
    for &i in &free {
        weights[i] = budget * scores[i] / total_score;
    }

    for pass in 0..bounds.iterations {
        let previous: Vec<f64> = free.iter().map(|&i| weights[i]).collect();

        for &i in &free {
            weights[i] = weights[i].clamp(min, max);
        }
        let gap = budget - free.iter().map(|&i| weights[i]).sum::<f64>();

        if gap > 0.0 {
            let receivers: Vec<usize> = free.iter().copied().filter(|&i| weights[i] < max).collect();
            let share: f64 = receivers.iter().map(|&i| scores[i]).sum();
            if share > 0.0 {
                for &i in &receivers {
                    weights[i] += gap * scores[i] / share;
                }
            }
        } else if gap < 0.0 {
            let donors: Vec<usize> = free.iter().copied().filter(|&i| weights[i] > min).collect();
            let slack: f64 = donors.iter().map(|&i| weights[i] - min).sum();
            if slack > 0.0 {
                for &i in &donors {
                    weights[i] += gap * (weights[i] - min) / slack;
                }
            }
        }

        let change = free
            .iter()
            .zip(&previous)
            .map(|(&i, &p)| (weights[i] - p).abs())
            .fold(0.0, f64::max);
        if change < CONVERGENCE_EPSILON {
            debug!(passes = pass + 1, symbols = candidates.len(), "allocation converged");
            break;
        }
    }

    let sum: f64 = weights.iter().sum();
    let out_of_bounds = free
        .iter()
        .any(|&i| weights[i] < min - SUM_TOLERANCE || weights[i] > max + SUM_TOLERANCE);
    if (sum - 1.0).abs() > SUM_TOLERANCE || out_of_bounds {
        return Err(EngineError::invalid_allocation(format!(
            "no allocation within [{min}, {max}] summing to 1 after {} passes",
            bounds.iterations
        )));
    }

    for &i in &free {
        weights[i] = weights[i].clamp(min, max);
    }
    Ok(labelled(candidates, &weights))
}

fn labelled(candidates: &[Candidate], weights: &[f64]) -> Vec<(String, f64)> {
    candidates
        .iter()
        .zip(weights)
        .map(|(c, &w)| (c.symbol().to_string(), w))
        .collect()
}
