//! Per-date indicator snapshots.
//!
//! A snapshot bundles every indicator the optimizer reads for one
//! (symbol, date). Snapshots are always recomputed from the full bar sequence,
//! never updated incrementally.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::indicator::{
    bollinger, calculate_bollinger, calculate_macd_default, calculate_rsi, calculate_sma, rsi,
};
use crate::domain::price::{PriceBar, closes};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub date: NaiveDate,
    pub price: f64,
    pub sma20: Option<f64>,
    pub sma50: Option<f64>,
    pub sma200: Option<f64>,
    pub rsi14: Option<f64>,
    pub macd_line: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_middle: Option<f64>,
    pub bollinger_lower: Option<f64>,
}

impl IndicatorSnapshot {
    /// Position of the price inside the Bollinger band: 0 at the lower band,
    /// 1 at the upper band. May fall outside [0, 1].
    pub fn band_position(&self) -> Option<f64> {
        let upper = self.bollinger_upper?;
        let lower = self.bollinger_lower?;
        let width = upper - lower;
        if width <= 0.0 {
            return Some(0.5);
        }
        Some((self.price - lower) / width)
    }

    /// Band width relative to the middle band.
    pub fn relative_band_width(&self) -> Option<f64> {
        let middle = self.bollinger_middle?;
        if middle <= 0.0 {
            return None;
        }
        Some((self.bollinger_upper? - self.bollinger_lower?) / middle)
    }
}

/// One snapshot per bar, in bar order.
pub fn compute_snapshots(bars: &[PriceBar]) -> Vec<IndicatorSnapshot> {
    let prices = closes(bars);
    let sma20 = calculate_sma(&prices, 20).values;
    let sma50 = calculate_sma(&prices, 50).values;
    let sma200 = calculate_sma(&prices, 200).values;
    let rsi14 = calculate_rsi(&prices, rsi::DEFAULT_PERIOD).values;
    let macd = calculate_macd_default(&prices);
    let bands = calculate_bollinger(
        &prices,
        bollinger::DEFAULT_PERIOD,
        bollinger::DEFAULT_STDDEV_MULT_X100,
    );

    bars.iter()
        .enumerate()
        .map(|(i, bar)| IndicatorSnapshot {
            symbol: bar.symbol.clone(),
            date: bar.date,
            price: bar.close,
            sma20: sma20[i],
            sma50: sma50[i],
            sma200: sma200[i],
            rsi14: rsi14[i],
            macd_line: macd.line[i],
            macd_signal: macd.signal[i],
            macd_histogram: macd.histogram[i],
            bollinger_upper: bands.upper[i],
            bollinger_middle: bands.middle[i],
            bollinger_lower: bands.lower[i],
        })
        .collect()
}
