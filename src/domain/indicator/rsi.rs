//! RSI (Relative Strength Index) indicator.
//!
//! Daily deltas D[0] = 0, D[i] = C[i] - C[i-1]. For i >= n the average gain
//! and average loss are plain means over the trailing n deltas (no Wilder
//! smoothing).
//!
//! Formula: RSI = 100 - (100 / (1 + avg_gain / avg_loss))
//! If avg_loss == 0: RSI = 100
//!
//! Warmup: first n entries are undefined.

use crate::domain::indicator::{IndicatorSeries, IndicatorType};

pub const DEFAULT_PERIOD: usize = 14;

pub fn calculate_rsi(prices: &[f64], period: usize) -> IndicatorSeries {
    if period == 0 || prices.len() <= period {
        return IndicatorSeries::undefined(IndicatorType::Rsi(period), prices.len());
    }

    let deltas: Vec<f64> = (0..prices.len())
        .map(|i| if i == 0 { 0.0 } else { prices[i] - prices[i - 1] })
        .collect();

    let values = (0..prices.len())
        .map(|i| {
            if i < period {
                return None;
            }
            let window = &deltas[i + 1 - period..=i];
            let avg_gain = window.iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
            let avg_loss = window
                .iter()
                .filter(|d| **d < 0.0)
                .map(|d| d.abs())
                .sum::<f64>()
                / period as f64;

            let rsi = if avg_loss == 0.0 {
                100.0
            } else {
                100.0 - (100.0 / (1.0 + avg_gain / avg_loss))
            };
            Some(rsi)
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Rsi(period),
        values,
    }
}
