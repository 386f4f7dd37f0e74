//! Append-only portfolio history port trait.

use crate::domain::error::EngineError;
use crate::domain::history::HistoryRecord;

pub trait HistoryStore: Send + Sync {
    fn append(&self, record: &HistoryRecord) -> Result<(), EngineError>;

    /// Records for one portfolio, oldest first.
    fn list_for_portfolio(&self, portfolio_id: i64) -> Result<Vec<HistoryRecord>, EngineError>;
}
