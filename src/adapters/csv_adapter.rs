//! CSV price history adapter.
//!
//! One file per symbol, `{SYMBOL}.csv`, with a header row and the columns
//! `date,open,high,low,close,volume[,adj_close]`. A missing `adj_close`
//! column falls back to the close.

use crate::domain::error::EngineError;
use crate::domain::price::PriceBar;
use crate::ports::price_port::PriceHistoryPort;
use chrono::NaiveDate;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub struct CsvAdapter {
    base_path: PathBuf,
}

fn csv_error(reason: String) -> EngineError {
    EngineError::Database { reason }
}

fn parse_field<T>(record: &csv::StringRecord, index: usize, name: &str) -> Result<T, EngineError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    record
        .get(index)
        .ok_or_else(|| csv_error(format!("missing {name} column")))?
        .trim()
        .parse()
        .map_err(|e| csv_error(format!("invalid {name} value: {e}")))
}

/// Every bar in the CSV file at `path`, ascending by date.
pub fn read_price_file(path: &Path, symbol: &str) -> Result<Vec<PriceBar>, EngineError> {
    let content = fs::read_to_string(path)?;
    parse_prices(&content, symbol)
}

fn parse_prices(content: &str, symbol: &str) -> Result<Vec<PriceBar>, EngineError> {
    let mut rdr = csv::Reader::from_reader(content.as_bytes());
    let mut bars = Vec::new();

    for result in rdr.records() {
        let record = result.map_err(|e| csv_error(format!("CSV parse error: {e}")))?;

        let date_str = record
            .get(0)
            .ok_or_else(|| csv_error("missing date column".into()))?;
        let date = NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d")
            .map_err(|e| csv_error(format!("invalid date format: {e}")))?;

        let close: f64 = parse_field(&record, 4, "close")?;
        let adj_close = match record.get(6) {
            Some(v) if !v.trim().is_empty() => parse_field(&record, 6, "adj_close")?,
            _ => close,
        };

        bars.push(PriceBar {
            symbol: symbol.to_string(),
            date,
            open: parse_field(&record, 1, "open")?,
            high: parse_field(&record, 2, "high")?,
            low: parse_field(&record, 3, "low")?,
            close,
            volume: parse_field(&record, 5, "volume")?,
            adj_close,
        });
    }

    bars.sort_by_key(|b| b.date);
    bars.dedup_by_key(|b| b.date);
    Ok(bars)
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{symbol}.csv"))
    }

    /// All bars for `symbol`; empty when it has no file.
    fn load(&self, symbol: &str) -> Result<Vec<PriceBar>, EngineError> {
        let path = self.csv_path(symbol);
        match fs::read_to_string(&path) {
            Ok(content) => parse_prices(&content, symbol),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(csv_error(format!("failed to read {}: {e}", path.display()))),
        }
    }
}

impl PriceHistoryPort for CsvAdapter {
    fn fetch_prices(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<PriceBar>, EngineError> {
        Ok(self
            .load(symbol)?
            .into_iter()
            .filter(|b| b.date >= start_date && b.date <= end_date)
            .collect())
    }

    fn latest_bar(&self, symbol: &str) -> Result<Option<PriceBar>, EngineError> {
        Ok(self.load(symbol)?.pop())
    }

    fn list_symbols(&self) -> Result<Vec<String>, EngineError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| {
            csv_error(format!(
                "failed to read directory {}: {e}",
                self.base_path.display()
            ))
        })?;

        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| csv_error(format!("directory entry error: {e}")))?;
            let name = entry.file_name();
            if let Some(symbol) = name.to_string_lossy().strip_suffix(".csv") {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}
