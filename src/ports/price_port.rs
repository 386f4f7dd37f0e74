//! Price history access port trait.

use crate::domain::error::EngineError;
use crate::domain::price::PriceBar;
use chrono::NaiveDate;

pub trait PriceHistoryPort: Send + Sync {
    /// Bars for `symbol` within `[start_date, end_date]`, ascending by date.
    fn fetch_prices(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<PriceBar>, EngineError>;

    /// Most recent bar on record for `symbol`.
    fn latest_bar(&self, symbol: &str) -> Result<Option<PriceBar>, EngineError>;

    fn list_symbols(&self) -> Result<Vec<String>, EngineError>;

    fn latest_price(&self, symbol: &str) -> Result<Option<f64>, EngineError> {
        Ok(self.latest_bar(symbol)?.map(|bar| bar.close))
    }
}
