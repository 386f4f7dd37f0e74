//! SQLite store: price history, portfolios, history records and indicator
//! snapshots behind one r2d2 pool.

use crate::domain::error::EngineError;
use crate::domain::history::{ChangeSource, ChangeType, HistoryRecord};
use crate::domain::portfolio::{Holding, OptimizationStatus, Portfolio};
use crate::domain::price::PriceBar;
use crate::domain::snapshot::IndicatorSnapshot;
use crate::ports::config_port::ConfigPort;
use crate::ports::history_port::HistoryStore;
use crate::ports::indicator_port::IndicatorStore;
use crate::ports::portfolio_port::PortfolioStore;
use crate::ports::price_port::PriceHistoryPort;
use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, Row, params};
use std::collections::{BTreeMap, BTreeSet};

const DATE_FORMAT: &str = "%Y-%m-%d";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS prices (
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume INTEGER NOT NULL,
    adj_close REAL NOT NULL,
    PRIMARY KEY (symbol, date)
);
CREATE TABLE IF NOT EXISTS portfolios (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    total_value REAL NOT NULL,
    total_return REAL NOT NULL,
    total_return_percentage REAL NOT NULL,
    risk_score REAL NOT NULL,
    optimization_status TEXT NOT NULL,
    last_optimized_at TEXT
);
CREATE TABLE IF NOT EXISTS holdings (
    portfolio_id INTEGER NOT NULL REFERENCES portfolios(id),
    position INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    company_name TEXT NOT NULL,
    shares REAL NOT NULL,
    entry_price REAL NOT NULL,
    entry_date TEXT NOT NULL,
    current_price REAL NOT NULL,
    weight REAL NOT NULL,
    return_value REAL NOT NULL,
    return_percentage REAL NOT NULL,
    PRIMARY KEY (portfolio_id, symbol)
);
CREATE TABLE IF NOT EXISTS portfolio_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    portfolio_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    change_type TEXT NOT NULL,
    change_date TEXT NOT NULL,
    previous_allocations TEXT NOT NULL,
    new_allocations TEXT NOT NULL,
    previous_value REAL NOT NULL,
    new_value REAL NOT NULL,
    risk_tolerance REAL NOT NULL,
    change_source TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS indicator_snapshots (
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    price REAL NOT NULL,
    sma20 REAL,
    sma50 REAL,
    sma200 REAL,
    rsi14 REAL,
    macd_line REAL,
    macd_signal REAL,
    macd_histogram REAL,
    bollinger_upper REAL,
    bollinger_middle REAL,
    bollinger_lower REAL,
    PRIMARY KEY (symbol, date)
);
CREATE INDEX IF NOT EXISTS idx_prices_date ON prices(date);
CREATE INDEX IF NOT EXISTS idx_history_portfolio ON portfolio_history(portfolio_id);
";

fn pool_err(e: r2d2::Error) -> EngineError {
    EngineError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> EngineError {
    EngineError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn conversion_err(
    column: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

fn date_col(row: &Row<'_>, column: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(column)?;
    NaiveDate::parse_from_str(&text, DATE_FORMAT).map_err(|e| conversion_err(column, e))
}

fn timestamp_col(row: &Row<'_>, column: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(column)?;
    text.map(|t| {
        DateTime::parse_from_rfc3339(&t)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_err(column, e))
    })
    .transpose()
}

fn json_col(row: &Row<'_>, column: usize) -> rusqlite::Result<BTreeMap<String, f64>> {
    let text: String = row.get(column)?;
    serde_json::from_str(&text).map_err(|e| conversion_err(column, e))
}

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
struct UnknownValue {
    kind: &'static str,
    value: String,
}

fn enum_col<T>(
    row: &Row<'_>,
    column: usize,
    kind: &'static str,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let text: String = row.get(column)?;
    parse(&text).ok_or_else(|| conversion_err(column, UnknownValue { kind, value: text }))
}

fn bar_from_row(row: &Row<'_>) -> rusqlite::Result<PriceBar> {
    Ok(PriceBar {
        symbol: row.get(0)?,
        date: date_col(row, 1)?,
        open: row.get(2)?,
        high: row.get(3)?,
        low: row.get(4)?,
        close: row.get(5)?,
        volume: row.get(6)?,
        adj_close: row.get(7)?,
    })
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<IndicatorSnapshot> {
    Ok(IndicatorSnapshot {
        symbol: row.get(0)?,
        date: date_col(row, 1)?,
        price: row.get(2)?,
        sma20: row.get(3)?,
        sma50: row.get(4)?,
        sma200: row.get(5)?,
        rsi14: row.get(6)?,
        macd_line: row.get(7)?,
        macd_signal: row.get(8)?,
        macd_histogram: row.get(9)?,
        bollinger_upper: row.get(10)?,
        bollinger_middle: row.get(11)?,
        bollinger_lower: row.get(12)?,
    })
}

const BAR_COLUMNS: &str = "symbol, date, open, high, low, close, volume, adj_close";
const SNAPSHOT_COLUMNS: &str = "symbol, date, price, sma20, sma50, sma200, rsi14, macd_line, \
     macd_signal, macd_histogram, bollinger_upper, bollinger_middle, bollinger_lower";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, EngineError> {
        let db_path =
            config
                .get_string("sqlite", "path")
                .ok_or_else(|| EngineError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_err)?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, EngineError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(pool_err)?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, EngineError> {
        self.pool.get().map_err(pool_err)
    }

    pub fn initialize_schema(&self) -> Result<(), EngineError> {
        self.conn()?.execute_batch(SCHEMA).map_err(query_err)
    }

    /// Record `bars`. A bar already recorded for the same symbol and date is
    /// kept as is; returns the number of new bars written.
    pub fn insert_bars(&self, bars: &[PriceBar]) -> Result<usize, EngineError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;

        let mut written = 0;
        for bar in bars {
            written += tx
                .execute(
                    "INSERT OR IGNORE INTO prices (symbol, date, open, high, low, close, volume, adj_close)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        bar.symbol,
                        bar.date.format(DATE_FORMAT).to_string(),
                        bar.open,
                        bar.high,
                        bar.low,
                        bar.close,
                        bar.volume,
                        bar.adj_close
                    ],
                )
                .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)?;
        Ok(written)
    }

    /// First date, last date and bar count for `symbol`.
    pub fn get_data_range(
        &self,
        symbol: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, EngineError> {
        let conn = self.conn()?;
        let result: (Option<String>, Option<String>, i64) = conn
            .query_row(
                "SELECT MIN(date), MAX(date), COUNT(*) FROM prices WHERE symbol = ?1",
                params![symbol],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(query_err)?;

        match result {
            (Some(min_str), Some(max_str), count) if count > 0 => {
                let parse = |s: &str| {
                    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| EngineError::Database {
                        reason: e.to_string(),
                    })
                };
                Ok(Some((parse(&min_str)?, parse(&max_str)?, count as usize)))
            }
            _ => Ok(None),
        }
    }

    fn load_holdings(&self, portfolio_id: i64) -> Result<Vec<Holding>, EngineError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT symbol, company_name, shares, entry_price, entry_date, current_price,
                        weight, return_value, return_percentage
                 FROM holdings WHERE portfolio_id = ?1 ORDER BY position",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![portfolio_id], |row| {
                Ok(Holding {
                    symbol: row.get(0)?,
                    company_name: row.get(1)?,
                    shares: row.get(2)?,
                    entry_price: row.get(3)?,
                    entry_date: date_col(row, 4)?,
                    current_price: row.get(5)?,
                    weight: row.get(6)?,
                    return_value: row.get(7)?,
                    return_percentage: row.get(8)?,
                })
            })
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }
}

impl PriceHistoryPort for SqliteAdapter {
    fn fetch_prices(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<PriceBar>, EngineError> {
        let conn = self.conn()?;
        let query = format!(
            "SELECT {BAR_COLUMNS} FROM prices
             WHERE symbol = ?1 AND date >= ?2 AND date <= ?3
             ORDER BY date ASC"
        );
        let mut stmt = conn.prepare(&query).map_err(query_err)?;
        let rows = stmt
            .query_map(
                params![
                    symbol,
                    start_date.format(DATE_FORMAT).to_string(),
                    end_date.format(DATE_FORMAT).to_string()
                ],
                bar_from_row,
            )
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn latest_bar(&self, symbol: &str) -> Result<Option<PriceBar>, EngineError> {
        let conn = self.conn()?;
        let query =
            format!("SELECT {BAR_COLUMNS} FROM prices WHERE symbol = ?1 ORDER BY date DESC LIMIT 1");
        conn.query_row(&query, params![symbol], bar_from_row)
            .optional()
            .map_err(query_err)
    }

    fn list_symbols(&self) -> Result<Vec<String>, EngineError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT symbol FROM prices ORDER BY symbol")
            .map_err(query_err)?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(query_err)?;
        rows.collect::<Result<Vec<String>, _>>().map_err(query_err)
    }
}

impl PortfolioStore for SqliteAdapter {
    fn load_by_id(&self, portfolio_id: i64) -> Result<Option<Portfolio>, EngineError> {
        let header = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT id, user_id, name, total_value, total_return, total_return_percentage,
                        risk_score, optimization_status, last_optimized_at
                 FROM portfolios WHERE id = ?1",
                params![portfolio_id],
                |row| {
                    Ok(Portfolio {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        name: row.get(2)?,
                        stocks: Vec::new(),
                        total_value: row.get(3)?,
                        total_return: row.get(4)?,
                        total_return_percentage: row.get(5)?,
                        risk_score: row.get(6)?,
                        optimization_status: enum_col(
                            row,
                            7,
                            "optimization status",
                            OptimizationStatus::parse,
                        )?,
                        last_optimized_at: timestamp_col(row, 8)?,
                    })
                },
            )
            .optional()
            .map_err(query_err)?
        };

        match header {
            Some(mut portfolio) => {
                portfolio.stocks = self.load_holdings(portfolio_id)?;
                Ok(Some(portfolio))
            }
            None => Ok(None),
        }
    }

    fn save(&self, portfolio: &Portfolio) -> Result<Portfolio, EngineError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;

        tx.execute(
            "INSERT INTO portfolios (id, user_id, name, total_value, total_return,
                 total_return_percentage, risk_score, optimization_status, last_optimized_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                 user_id = excluded.user_id,
                 name = excluded.name,
                 total_value = excluded.total_value,
                 total_return = excluded.total_return,
                 total_return_percentage = excluded.total_return_percentage,
                 risk_score = excluded.risk_score,
                 optimization_status = excluded.optimization_status,
                 last_optimized_at = excluded.last_optimized_at",
            params![
                portfolio.id,
                portfolio.user_id,
                portfolio.name,
                portfolio.total_value,
                portfolio.total_return,
                portfolio.total_return_percentage,
                portfolio.risk_score,
                portfolio.optimization_status.as_str(),
                portfolio.last_optimized_at.map(|t| t.to_rfc3339())
            ],
        )
        .map_err(query_err)?;

        tx.execute(
            "DELETE FROM holdings WHERE portfolio_id = ?1",
            params![portfolio.id],
        )
        .map_err(query_err)?;

        for (position, holding) in portfolio.stocks.iter().enumerate() {
            tx.execute(
                "INSERT INTO holdings (portfolio_id, position, symbol, company_name, shares,
                     entry_price, entry_date, current_price, weight, return_value, return_percentage)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    portfolio.id,
                    position as i64,
                    holding.symbol,
                    holding.company_name,
                    holding.shares,
                    holding.entry_price,
                    holding.entry_date.format(DATE_FORMAT).to_string(),
                    holding.current_price,
                    holding.weight,
                    holding.return_value,
                    holding.return_percentage
                ],
            )
            .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)?;
        Ok(portfolio.clone())
    }

    fn find_symbols_across_all_data(&self) -> Result<BTreeSet<String>, EngineError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT symbol FROM prices UNION SELECT symbol FROM holdings")
            .map_err(query_err)?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(query_err)?;
        rows.collect::<Result<BTreeSet<String>, _>>().map_err(query_err)
    }
}

impl HistoryStore for SqliteAdapter {
    fn append(&self, record: &HistoryRecord) -> Result<(), EngineError> {
        let encode = |allocations: &BTreeMap<String, f64>| {
            serde_json::to_string(allocations).map_err(|e| EngineError::Database {
                reason: e.to_string(),
            })
        };
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO portfolio_history (portfolio_id, user_id, change_type, change_date,
                 previous_allocations, new_allocations, previous_value, new_value,
                 risk_tolerance, change_source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.portfolio_id,
                record.user_id,
                record.change_type.as_str(),
                record.change_date.to_rfc3339(),
                encode(&record.previous_allocations)?,
                encode(&record.new_allocations)?,
                record.previous_value,
                record.new_value,
                record.risk_tolerance,
                record.change_source.as_str()
            ],
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn list_for_portfolio(&self, portfolio_id: i64) -> Result<Vec<HistoryRecord>, EngineError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT portfolio_id, user_id, change_type, change_date, previous_allocations,
                        new_allocations, previous_value, new_value, risk_tolerance, change_source
                 FROM portfolio_history WHERE portfolio_id = ?1 ORDER BY id ASC",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![portfolio_id], |row| {
                Ok(HistoryRecord {
                    portfolio_id: row.get(0)?,
                    user_id: row.get(1)?,
                    change_type: enum_col(row, 2, "change type", ChangeType::parse)?,
                    change_date: timestamp_col(row, 3)?
                        .ok_or(rusqlite::Error::InvalidColumnType(
                            3,
                            "change_date".into(),
                            rusqlite::types::Type::Null,
                        ))?,
                    previous_allocations: json_col(row, 4)?,
                    new_allocations: json_col(row, 5)?,
                    previous_value: row.get(6)?,
                    new_value: row.get(7)?,
                    risk_tolerance: row.get(8)?,
                    change_source: enum_col(row, 9, "change source", ChangeSource::parse)?,
                })
            })
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }
}

impl IndicatorStore for SqliteAdapter {
    fn replace_range(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        snapshots: &[IndicatorSnapshot],
    ) -> Result<usize, EngineError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        let removed = tx
            .execute(
                "DELETE FROM indicator_snapshots WHERE symbol = ?1 AND date >= ?2 AND date <= ?3",
                params![
                    symbol,
                    start_date.format(DATE_FORMAT).to_string(),
                    end_date.format(DATE_FORMAT).to_string()
                ],
            )
            .map_err(query_err)?;
        for s in snapshots {
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO indicator_snapshots ({SNAPSHOT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    s.symbol,
                    s.date.format(DATE_FORMAT).to_string(),
                    s.price,
                    s.sma20,
                    s.sma50,
                    s.sma200,
                    s.rsi14,
                    s.macd_line,
                    s.macd_signal,
                    s.macd_histogram,
                    s.bollinger_upper,
                    s.bollinger_middle,
                    s.bollinger_lower
                ],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)?;
        Ok(removed)
    }

    fn latest_snapshot(&self, symbol: &str) -> Result<Option<IndicatorSnapshot>, EngineError> {
        let conn = self.conn()?;
        let query = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM indicator_snapshots
             WHERE symbol = ?1 ORDER BY date DESC LIMIT 1"
        );
        conn.query_row(&query, params![symbol], snapshot_from_row)
            .optional()
            .map_err(query_err)
    }

    fn list_range(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<IndicatorSnapshot>, EngineError> {
        let conn = self.conn()?;
        let query = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM indicator_snapshots
             WHERE symbol = ?1 AND date >= ?2 AND date <= ?3
             ORDER BY date ASC"
        );
        let mut stmt = conn.prepare(&query).map_err(query_err)?;
        let rows = stmt
            .query_map(
                params![
                    symbol,
                    start_date.format(DATE_FORMAT).to_string(),
                    end_date.format(DATE_FORMAT).to_string()
                ],
                snapshot_from_row,
            )
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }
}
