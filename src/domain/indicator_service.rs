//! Indicator computation over stored price history.

use chrono::{Duration, NaiveDate};
use tracing::{debug, info};

use crate::domain::error::EngineError;
use crate::domain::snapshot::{IndicatorSnapshot, compute_snapshots};
use crate::ports::indicator_port::IndicatorStore;
use crate::ports::price_port::PriceHistoryPort;

/// Fewest bars worth computing indicators over (one Bollinger window).
pub const MIN_INDICATOR_BARS: usize = 20;

/// Calendar days fetched ahead of a requested range so long windows such as
/// SMA(200) are defined from its first date when history allows.
pub const WARMUP_CALENDAR_DAYS: i64 = 300;

/// Recompute and store snapshots for `symbol` over `[start_date, end_date]`.
///
/// Stored snapshots in the range are replaced in one unit of work, so repeated
/// calls leave exactly one snapshot per bar.
pub fn compute_indicators(
    prices: &dyn PriceHistoryPort,
    store: &dyn IndicatorStore,
    symbol: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<Vec<IndicatorSnapshot>, EngineError> {
    let bars = prices.fetch_prices(
        symbol,
        start_date - Duration::days(WARMUP_CALENDAR_DAYS),
        end_date,
    )?;
    if bars.len() < MIN_INDICATOR_BARS {
        return Err(EngineError::InsufficientData {
            symbol: symbol.to_string(),
            bars: bars.len(),
            minimum: MIN_INDICATOR_BARS,
        });
    }

    let snapshots: Vec<IndicatorSnapshot> = compute_snapshots(&bars)
        .into_iter()
        .filter(|s| s.date >= start_date && s.date <= end_date)
        .collect();

    let removed = store.replace_range(symbol, start_date, end_date, &snapshots)?;
    info!(
        symbol,
        removed,
        stored = snapshots.len(),
        "indicator snapshots recomputed"
    );
    Ok(snapshots)
}

/// Snapshots already stored for `symbol` over `[start_date, end_date]`.
pub fn stored_indicators(
    store: &dyn IndicatorStore,
    symbol: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<Vec<IndicatorSnapshot>, EngineError> {
    store.list_range(symbol, start_date, end_date)
}

/// Most recent snapshot for `symbol` as of `today`.
///
/// A stored snapshot is used only when it covers the latest bar recorded on
/// or before `today`. Otherwise one is computed from the last
/// `historical_days` of history.
pub fn latest_snapshot(
    prices: &dyn PriceHistoryPort,
    store: &dyn IndicatorStore,
    symbol: &str,
    today: NaiveDate,
    historical_days: i64,
) -> Result<IndicatorSnapshot, EngineError> {
    let bars = prices.fetch_prices(symbol, today - Duration::days(historical_days), today)?;
    let last_bar_date = bars.iter().map(|b| b.date).max();

    if let Some(snapshot) = store.latest_snapshot(symbol)? {
        match last_bar_date {
            Some(last) if snapshot.date >= last && snapshot.date <= today => return Ok(snapshot),
            _ => debug!(
                symbol,
                stored = %snapshot.date,
                "stored snapshot is stale, recomputing"
            ),
        }
    }

    if bars.len() < MIN_INDICATOR_BARS {
        return Err(EngineError::InsufficientData {
            symbol: symbol.to_string(),
            bars: bars.len(),
            minimum: MIN_INDICATOR_BARS,
        });
    }
    debug!(symbol, bars = bars.len(), "computed snapshot on demand");
    compute_snapshots(&bars)
        .pop()
        .ok_or_else(|| EngineError::InsufficientData {
            symbol: symbol.to_string(),
            bars: 0,
            minimum: MIN_INDICATOR_BARS,
        })
}
