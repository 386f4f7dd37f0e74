//! Simple Moving Average.
//!
//! SMA(n)[i] = mean(C[i-n+1..=i]) for i >= n-1.
//! Warmup: first (n-1) entries are undefined.

use crate::domain::indicator::{IndicatorSeries, IndicatorType};

pub fn calculate_sma(prices: &[f64], period: usize) -> IndicatorSeries {
    if period == 0 {
        return IndicatorSeries::undefined(IndicatorType::Sma(period), prices.len());
    }

    let values = (0..prices.len())
        .map(|i| {
            if i + 1 < period {
                None
            } else {
                let window = &prices[i + 1 - period..=i];
                Some(window.iter().sum::<f64>() / period as f64)
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Sma(period),
        values,
    }
}
