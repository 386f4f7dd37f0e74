//! Portfolio storage port trait.

use crate::domain::error::EngineError;
use crate::domain::portfolio::Portfolio;
use std::collections::BTreeSet;

pub trait PortfolioStore: Send + Sync {
    fn load_by_id(&self, portfolio_id: i64) -> Result<Option<Portfolio>, EngineError>;

    /// Persist `portfolio` and return the stored copy.
    fn save(&self, portfolio: &Portfolio) -> Result<Portfolio, EngineError>;

    /// Every symbol the store knows about, across all portfolios and price data.
    fn find_symbols_across_all_data(&self) -> Result<BTreeSet<String>, EngineError>;
}
