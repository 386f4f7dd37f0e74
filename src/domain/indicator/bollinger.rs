//! Bollinger Bands indicator.
//!
//! Bollinger Bands consist of:
//! - Middle: Simple Moving Average (SMA) over n periods
//! - Upper: Middle + (multiplier × StdDev)
//! - Lower: Middle - (multiplier × StdDev)
//!
//! Where StdDev is population standard deviation (divides by N, not N-1).
//!
//! Default parameters: period=20, multiplier=2.0
//! Warmup: first (period-1) entries are undefined.

use crate::domain::indicator::{IndicatorType, calculate_sma, calculate_stddev};

pub const DEFAULT_PERIOD: usize = 20;
pub const DEFAULT_STDDEV_MULT_X100: u32 = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerSeries {
    pub indicator_type: IndicatorType,
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

pub fn calculate_bollinger(prices: &[f64], period: usize, stddev_mult_x100: u32) -> BollingerSeries {
    let mult = stddev_mult_x100 as f64 / 100.0;
    let middle = calculate_sma(prices, period).values;
    let stddev = calculate_stddev(prices, period).values;

    let (upper, lower): (Vec<Option<f64>>, Vec<Option<f64>>) = middle
        .iter()
        .zip(&stddev)
        .map(|(&m, &s)| match (m, s) {
            (Some(m), Some(s)) => (Some(m + mult * s), Some(m - mult * s)),
            _ => (None, None),
        })
        .unzip();

    BollingerSeries {
        indicator_type: IndicatorType::Bollinger {
            period,
            stddev_mult_x100,
        },
        upper,
        middle,
        lower,
    }
}
