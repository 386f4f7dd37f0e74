//! Exponential Moving Average indicator.
//!
//! k = 2/(n+1), seed with the mean of the first n defined inputs, then
//! EMA[i] = (C[i] - EMA[i-1]) * k + EMA[i-1].
//!
//! Leading undefined inputs shift the seed forward (this is how EMA of the
//! MACD line is taken). An undefined input at or after the seed window makes
//! every later output undefined.

use crate::domain::indicator::{IndicatorSeries, IndicatorType};

pub fn calculate_ema(values: &[Option<f64>], period: usize) -> IndicatorSeries {
    let mut out = IndicatorSeries::undefined(IndicatorType::Ema(period), values.len());
    if period == 0 {
        return out;
    }

    let Some(first_defined) = values.iter().position(Option::is_some) else {
        return out;
    };
    let seed_index = first_defined + period - 1;
    if seed_index >= values.len() {
        return out;
    }

    let mut sum = 0.0;
    for value in &values[first_defined..=seed_index] {
        match value {
            Some(v) => sum += v,
            None => return out,
        }
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = sum / period as f64;
    out.values[seed_index] = Some(ema);

    for i in (seed_index + 1)..values.len() {
        match values[i] {
            Some(price) => {
                ema = (price - ema) * k + ema;
                out.values[i] = Some(ema);
            }
            None => break,
        }
    }

    out
}

/// EMA over a fully defined close series.
pub fn calculate_price_ema(prices: &[f64], period: usize) -> IndicatorSeries {
    let values: Vec<Option<f64>> = prices.iter().copied().map(Some).collect();
    calculate_ema(&values, period)
}
