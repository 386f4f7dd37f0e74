#![allow(dead_code)]

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use folioai::domain::config::EngineConfig;
use folioai::domain::error::EngineError;
use folioai::domain::history::HistoryRecord;
use folioai::domain::portfolio::{Holding, Portfolio};
use folioai::domain::prediction::Prediction;
pub use folioai::domain::price::PriceBar;
use folioai::domain::service::{EnginePorts, UpgradeService};
use folioai::domain::snapshot::IndicatorSnapshot;
use folioai::ports::history_port::HistoryStore;
use folioai::ports::indicator_port::IndicatorStore;
use folioai::ports::oracle_port::PredictionOracle;
use folioai::ports::portfolio_port::PortfolioStore;
use folioai::ports::price_port::PriceHistoryPort;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Fixed "now" used across the integration tests.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 28, 16, 0, 0).unwrap()
}

pub fn today() -> NaiveDate {
    now().date_naive()
}

pub fn make_bar(symbol: &str, date: NaiveDate, close: f64) -> PriceBar {
    PriceBar {
        symbol: symbol.to_string(),
        date,
        open: close,
        high: close * 1.01,
        low: close * 0.99,
        close,
        volume: 1_000,
        adj_close: close,
    }
}

/// `n` consecutive daily bars ending on `end`, closes from `close(i)`.
pub fn generate_bars(
    symbol: &str,
    end: NaiveDate,
    n: i64,
    close: impl Fn(i64) -> f64,
) -> Vec<PriceBar> {
    (0..n)
        .map(|i| make_bar(symbol, end - Duration::days(n - 1 - i), close(i)))
        .collect()
}

/// Bars ending today with a gentle oscillation around `last`.
pub fn series_ending_at(symbol: &str, last: f64) -> Vec<PriceBar> {
    series_ending_on(symbol, today(), last)
}

/// 120 daily bars ending on `end` whose final close is `last`.
pub fn series_ending_on(symbol: &str, end: NaiveDate, last: f64) -> Vec<PriceBar> {
    let n = 120;
    generate_bars(symbol, end, n, |i| {
        if i == n - 1 {
            last
        } else {
            last * (1.0 + 0.02 * ((i as f64) * 0.7).sin())
        }
    })
}

#[derive(Default)]
pub struct MockPrices {
    pub bars: Mutex<HashMap<String, Vec<PriceBar>>>,
    pub errors: Mutex<HashMap<String, String>>,
}

impl MockPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(self, symbol: &str, bars: Vec<PriceBar>) -> Self {
        self.bars.lock().unwrap().insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(self, symbol: &str, reason: &str) -> Self {
        self.errors
            .lock()
            .unwrap()
            .insert(symbol.to_string(), reason.to_string());
        self
    }

    /// Append a bar at `on` closing at `close`.
    pub fn push_close(&self, symbol: &str, on: NaiveDate, close: f64) {
        self.bars
            .lock()
            .unwrap()
            .entry(symbol.to_string())
            .or_default()
            .push(make_bar(symbol, on, close));
    }

    fn check(&self, symbol: &str) -> Result<(), EngineError> {
        match self.errors.lock().unwrap().get(symbol) {
            Some(reason) => Err(EngineError::Database {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl PriceHistoryPort for MockPrices {
    fn fetch_prices(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<PriceBar>, EngineError> {
        self.check(symbol)?;
        Ok(self
            .bars
            .lock()
            .unwrap()
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.date >= start_date && b.date <= end_date)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn latest_bar(&self, symbol: &str) -> Result<Option<PriceBar>, EngineError> {
        self.check(symbol)?;
        Ok(self
            .bars
            .lock()
            .unwrap()
            .get(symbol)
            .and_then(|bars| bars.iter().max_by_key(|b| b.date).cloned()))
    }

    fn list_symbols(&self) -> Result<Vec<String>, EngineError> {
        let mut symbols: Vec<String> = self.bars.lock().unwrap().keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}

/// Oracle answering from a fixed table of (predicted % change, confidence).
#[derive(Default)]
pub struct MockOracle {
    pub answers: HashMap<String, (f64, f64)>,
    pub current_prices: HashMap<String, f64>,
    pub calls: AtomicUsize,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prediction(mut self, symbol: &str, price: f64, change_pct: f64, confidence: f64) -> Self {
        self.answers
            .insert(symbol.to_string(), (change_pct, confidence));
        self.current_prices.insert(symbol.to_string(), price);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PredictionOracle for MockOracle {
    fn predict(&self, symbol: &str) -> Result<Prediction, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (change_pct, confidence) =
            self.answers
                .get(symbol)
                .copied()
                .ok_or_else(|| EngineError::OracleUnavailable {
                    reason: format!("no model for {symbol}"),
                })?;
        let price = self.current_prices.get(symbol).copied().unwrap_or(100.0);
        Ok(Prediction::new(
            symbol,
            today(),
            30,
            price,
            price * (1.0 + change_pct / 100.0),
            confidence,
        ))
    }
}

#[derive(Default)]
pub struct MockPortfolios {
    pub portfolios: Mutex<HashMap<i64, Portfolio>>,
    pub catalog: Mutex<BTreeSet<String>>,
    pub saves: AtomicUsize,
    pub fail_saves: AtomicBool,
    pub attempts: AtomicUsize,
    /// 1-based save attempt that is rejected.
    pub fail_attempt: Mutex<Option<usize>>,
}

impl MockPortfolios {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_portfolio(self, portfolio: Portfolio) -> Self {
        self.portfolios
            .lock()
            .unwrap()
            .insert(portfolio.id, portfolio);
        self
    }

    pub fn with_catalog(self, symbols: &[&str]) -> Self {
        self.catalog
            .lock()
            .unwrap()
            .extend(symbols.iter().map(|s| s.to_string()));
        self
    }

    pub fn failing_attempt(self, attempt: usize) -> Self {
        *self.fail_attempt.lock().unwrap() = Some(attempt);
        self
    }

    pub fn stored(&self, id: i64) -> Portfolio {
        self.portfolios.lock().unwrap()[&id].clone()
    }
}

impl PortfolioStore for MockPortfolios {
    fn load_by_id(&self, portfolio_id: i64) -> Result<Option<Portfolio>, EngineError> {
        Ok(self.portfolios.lock().unwrap().get(&portfolio_id).cloned())
    }

    fn save(&self, portfolio: &Portfolio) -> Result<Portfolio, EngineError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_saves.load(Ordering::SeqCst)
            || *self.fail_attempt.lock().unwrap() == Some(attempt)
        {
            return Err(EngineError::Database {
                reason: "write rejected".into(),
            });
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.portfolios
            .lock()
            .unwrap()
            .insert(portfolio.id, portfolio.clone());
        Ok(portfolio.clone())
    }

    fn find_symbols_across_all_data(&self) -> Result<BTreeSet<String>, EngineError> {
        let mut symbols = self.catalog.lock().unwrap().clone();
        for portfolio in self.portfolios.lock().unwrap().values() {
            symbols.extend(portfolio.symbols());
        }
        Ok(symbols)
    }
}

#[derive(Default)]
pub struct MockHistory {
    pub records: Mutex<Vec<HistoryRecord>>,
    pub fail: AtomicBool,
}

impl MockHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let history = Self::default();
        history.fail.store(true, Ordering::SeqCst);
        history
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl HistoryStore for MockHistory {
    fn append(&self, record: &HistoryRecord) -> Result<(), EngineError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::Database {
                reason: "history unavailable".into(),
            });
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn list_for_portfolio(&self, portfolio_id: i64) -> Result<Vec<HistoryRecord>, EngineError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.portfolio_id == portfolio_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MockIndicators {
    pub snapshots: Mutex<Vec<IndicatorSnapshot>>,
}

impl MockIndicators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_for(&self, symbol: &str) -> usize {
        self.snapshots
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.symbol == symbol)
            .count()
    }
}

impl IndicatorStore for MockIndicators {
    fn replace_range(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        replacement: &[IndicatorSnapshot],
    ) -> Result<usize, EngineError> {
        let mut snapshots = self.snapshots.lock().unwrap();
        let before = snapshots.len();
        snapshots.retain(|s| !(s.symbol == symbol && s.date >= start_date && s.date <= end_date));
        let removed = before - snapshots.len();
        snapshots.extend(replacement.iter().cloned());
        Ok(removed)
    }

    fn latest_snapshot(&self, symbol: &str) -> Result<Option<IndicatorSnapshot>, EngineError> {
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.symbol == symbol)
            .max_by_key(|s| s.date)
            .cloned())
    }

    fn list_range(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<IndicatorSnapshot>, EngineError> {
        let mut found: Vec<IndicatorSnapshot> = self
            .snapshots
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.symbol == symbol && s.date >= start_date && s.date <= end_date)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.date);
        Ok(found)
    }
}

/// Mock ports plus handles for inspecting them after a run.
pub struct Harness {
    pub prices: Arc<MockPrices>,
    pub oracle: Arc<MockOracle>,
    pub portfolios: Arc<MockPortfolios>,
    pub history: Arc<MockHistory>,
    pub indicators: Arc<MockIndicators>,
}

impl Harness {
    pub fn new(prices: MockPrices, oracle: MockOracle, portfolios: MockPortfolios) -> Self {
        Self {
            prices: Arc::new(prices),
            oracle: Arc::new(oracle),
            portfolios: Arc::new(portfolios),
            history: Arc::new(MockHistory::new()),
            indicators: Arc::new(MockIndicators::new()),
        }
    }

    pub fn with_history(mut self, history: MockHistory) -> Self {
        self.history = Arc::new(history);
        self
    }

    pub fn ports(&self) -> EnginePorts {
        EnginePorts {
            prices: self.prices.clone(),
            oracle: self.oracle.clone(),
            portfolios: self.portfolios.clone(),
            history: self.history.clone(),
            indicators: self.indicators.clone(),
        }
    }

    pub fn service(&self, config: EngineConfig) -> UpgradeService {
        UpgradeService::new(self.ports(), config)
    }
}

/// Defaults with a single-stock portfolio allowed to hold everything.
pub fn concentrated_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.optimizer.max_stock_allocation = 1.0;
    config
}

/// AAPL 10 shares entered at $130, now at $150.
pub fn aapl_portfolio(id: i64) -> Portfolio {
    Portfolio::new(
        id,
        7,
        "Core",
        vec![Holding::new(
            "AAPL",
            "Apple Inc.",
            10.0,
            130.0,
            date(2024, 1, 15),
            150.0,
        )],
    )
}

pub fn two_stock_portfolio(id: i64) -> Portfolio {
    Portfolio::new(
        id,
        7,
        "Pair",
        vec![
            Holding::new("AAPL", "Apple Inc.", 10.0, 130.0, date(2024, 1, 15), 150.0),
            Holding::new("MSFT", "Microsoft", 5.0, 280.0, date(2024, 1, 15), 300.0),
        ],
    )
}
