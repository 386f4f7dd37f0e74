//! Indicator snapshot storage port trait.

use crate::domain::error::EngineError;
use crate::domain::snapshot::IndicatorSnapshot;
use chrono::NaiveDate;

pub trait IndicatorStore: Send + Sync {
    /// Replace every stored snapshot for `symbol` dated within
    /// `[start_date, end_date]` with `snapshots` as one unit of work.
    /// Returns the number of snapshots removed.
    fn replace_range(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        snapshots: &[IndicatorSnapshot],
    ) -> Result<usize, EngineError>;

    fn latest_snapshot(&self, symbol: &str) -> Result<Option<IndicatorSnapshot>, EngineError>;

    fn list_range(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<IndicatorSnapshot>, EngineError>;
}
