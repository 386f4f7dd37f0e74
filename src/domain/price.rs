//! Daily price bar representation.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One trading day for one symbol. Unique per (symbol, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub adj_close: f64,
}

impl PriceBar {
    /// Percentage change from `previous` close to this bar's close.
    pub fn change_pct_from(&self, previous: &PriceBar) -> Option<f64> {
        if previous.close == 0.0 {
            return None;
        }
        Some((self.close - previous.close) / previous.close * 100.0)
    }
}

/// Closing prices in input order.
pub fn closes(bars: &[PriceBar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

/// Percentage return between the first and last close of `bars`.
///
/// `None` with fewer than two bars or a zero starting price.
pub fn period_return_pct(bars: &[PriceBar]) -> Option<f64> {
    match (bars.first(), bars.last()) {
        (Some(first), Some(last)) if bars.len() >= 2 => last.change_pct_from(first),
        _ => None,
    }
}
