//! MACD (Moving Average Convergence Divergence) indicator.
//!
//! MACD Line = EMA(fast) - EMA(slow), where both are defined
//! Signal Line = EMA(signal) of MACD Line
//! Histogram = MACD Line - Signal Line
//!
//! Default parameters: fast=12, slow=26, signal=9
//! Warmup: line from slow - 1, signal/histogram from slow - 1 + signal - 1.

use crate::domain::indicator::{IndicatorType, calculate_ema, calculate_price_ema};

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

#[derive(Debug, Clone, PartialEq)]
pub struct MacdSeries {
    pub indicator_type: IndicatorType,
    pub line: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

pub fn calculate_macd(prices: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdSeries {
    let ema_fast = calculate_price_ema(prices, fast).values;
    let ema_slow = calculate_price_ema(prices, slow).values;

    let line: Vec<Option<f64>> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();

    let signal = calculate_ema(&line, signal_period).values;

    let histogram = line
        .iter()
        .zip(&signal)
        .map(|(l, s)| Some((*l)? - (*s)?))
        .collect();

    MacdSeries {
        indicator_type: IndicatorType::Macd {
            fast,
            slow,
            signal: signal_period,
        },
        line,
        signal,
        histogram,
    }
}

pub fn calculate_macd_default(prices: &[f64]) -> MacdSeries {
    calculate_macd(prices, DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rising(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64).collect()
    }

    #[test]
    fn macd_warmup_default() {
        let series = calculate_macd_default(&rising(40));

        for i in 0..DEFAULT_SLOW - 1 {
            assert!(series.line[i].is_none(), "line at {} should be undefined", i);
        }
        assert!(series.line[DEFAULT_SLOW - 1].is_some());

        let warmup = DEFAULT_SLOW - 1 + DEFAULT_SIGNAL - 1;
        for i in 0..warmup {
            assert!(series.signal[i].is_none(), "signal at {} should be undefined", i);
            assert!(series.histogram[i].is_none());
        }
        assert!(series.signal[warmup].is_some());
        assert!(series.histogram[warmup].is_some());
    }

    #[test]
    fn macd_histogram_equals_line_minus_signal() {
        let series = calculate_macd_default(&rising(60));

        for i in 0..60 {
            if let (Some(l), Some(s), Some(h)) =
                (series.line[i], series.signal[i], series.histogram[i])
            {
                assert!((h - (l - s)).abs() < f64::EPSILON);
            }
        }
    }

    #[test]
    fn macd_indicator_type() {
        let series = calculate_macd(&[100.0, 101.0, 102.0], 5, 10, 3);
        assert_eq!(
            series.indicator_type,
            IndicatorType::Macd {
                fast: 5,
                slow: 10,
                signal: 3
            }
        );
    }

    #[test]
    fn macd_empty() {
        let series = calculate_macd_default(&[]);
        assert!(series.line.is_empty());
        assert!(series.signal.is_empty());
        assert!(series.histogram.is_empty());
    }

    #[test]
    fn macd_zero_period_is_undefined() {
        let prices = [100.0, 101.0, 102.0];
        for series in [
            calculate_macd(&prices, 0, 26, 9),
            calculate_macd(&prices, 12, 0, 9),
            calculate_macd(&prices, 12, 26, 0),
        ] {
            assert_eq!(series.line.len(), 3);
            assert!(series.histogram.iter().all(Option::is_none));
        }
    }

    #[test]
    fn macd_custom_parameters() {
        let series = calculate_macd(&rising(20), 5, 10, 3);
        let warmup = 10 - 1 + 3 - 1;
        assert!(series.signal[warmup - 1].is_none());
        assert!(series.signal[warmup].is_some());
    }

    #[test]
    fn macd_default_constants() {
        assert_eq!(DEFAULT_FAST, 12);
        assert_eq!(DEFAULT_SLOW, 26);
        assert_eq!(DEFAULT_SIGNAL, 9);
    }

    proptest! {
        #[test]
        fn macd_line_is_fast_minus_slow(prices in prop::collection::vec(1.0f64..500.0, 0..90)) {
            let series = calculate_macd_default(&prices);
            let fast = calculate_price_ema(&prices, DEFAULT_FAST).values;
            let slow = calculate_price_ema(&prices, DEFAULT_SLOW).values;

            prop_assert_eq!(series.line.len(), prices.len());
            for i in 0..prices.len() {
                match (fast[i], slow[i]) {
                    (Some(f), Some(s)) => {
                        prop_assert!((series.line[i].unwrap() - (f - s)).abs() < 1e-12);
                    }
                    _ => prop_assert!(series.line[i].is_none()),
                }
            }
        }
    }
}
