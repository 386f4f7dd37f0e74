//! CLI definition and dispatch.

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::config::load_engine_config;
use crate::domain::error::EngineError;
use crate::domain::portfolio::Holding;
use crate::domain::universe::parse_symbols;

#[derive(Parser, Debug)]
#[command(name = "folioai", about = "AI-assisted portfolio optimization engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load `{SYMBOL}.csv` price files from a directory into the database
    Import {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        dir: PathBuf,
        /// Comma-separated subset of symbols to import
        #[arg(long)]
        symbols: Option<String>,
    },
    /// Show stored price range for symbol(s)
    Info {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbols: String,
    },
    /// Check the engine configuration
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Compute and store indicator snapshots for a date range
    Indicators {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        /// List the stored snapshots instead of recomputing them
        #[arg(long)]
        show: bool,
    },
    /// Ask the prediction oracle about symbol(s)
    Predict {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbols: String,
    },
    /// Create or replace a portfolio from `SYMBOL=SHARES@PRICE` holdings
    CreatePortfolio {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        id: i64,
        #[arg(long, default_value_t = 1)]
        user_id: i64,
        #[arg(long)]
        name: String,
        /// e.g. `AAPL=10@150.5,MSFT=4@320`
        #[arg(long)]
        holdings: String,
    },
    /// Generate an upgrade recommendation without changing holdings
    Upgrade {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        portfolio: i64,
        #[arg(long)]
        risk_tolerance: Option<f64>,
        #[arg(long)]
        expand: bool,
    },
    /// Rebalance a portfolio to `SYMBOL=FRACTION` target weights
    Apply {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        portfolio: i64,
        /// e.g. `AAPL=0.6,MSFT=0.4`
        #[arg(long)]
        allocations: String,
    },
    /// List recorded allocation changes for a portfolio
    History {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        portfolio: i64,
    },
    /// Start the JSON API and the periodic performance sweep
    Serve {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Import {
            config,
            dir,
            symbols,
        } => run_import(&config, &dir, symbols.as_deref()),
        Command::Info { config, symbols } => run_info(&config, &symbols),
        Command::Validate { config } => run_validate(&config),
        Command::Indicators {
            config,
            symbol,
            start,
            end,
            show,
        } => run_indicators(&config, &symbol, start, end, show),
        Command::Predict { config, symbols } => run_predict(&config, &symbols),
        Command::CreatePortfolio {
            config,
            id,
            user_id,
            name,
            holdings,
        } => run_create_portfolio(&config, id, user_id, &name, &holdings),
        Command::Upgrade {
            config,
            portfolio,
            risk_tolerance,
            expand,
        } => run_upgrade(&config, portfolio, risk_tolerance, expand),
        Command::Apply {
            config,
            portfolio,
            allocations,
        } => run_apply(&config, portfolio, &allocations),
        Command::History { config, portfolio } => run_history(&config, portfolio),
        Command::Serve { config } => run_serve(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, EngineError> {
    info!(path = %path.display(), "loading config");
    FileConfigAdapter::from_file(path)
}

/// Parse `SYMBOL=FRACTION` pairs.
pub fn parse_allocations(input: &str) -> Result<BTreeMap<String, f64>, EngineError> {
    let mut allocations = BTreeMap::new();
    for token in input.split(',') {
        let (symbol, weight) = token
            .split_once('=')
            .ok_or_else(|| EngineError::invalid_allocation(format!("expected SYMBOL=WEIGHT, got '{}'", token.trim())))?;
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(EngineError::invalid_allocation("empty symbol"));
        }
        let weight: f64 = weight
            .trim()
            .parse()
            .map_err(|_| EngineError::invalid_allocation(format!("invalid weight for {symbol}")))?;
        if allocations.insert(symbol.clone(), weight).is_some() {
            return Err(EngineError::invalid_allocation(format!("duplicate symbol {symbol}")));
        }
    }
    Ok(allocations)
}

/// Parse `SYMBOL=SHARES@PRICE` pairs into holdings entered on `entry_date`.
pub fn parse_holdings(input: &str, entry_date: NaiveDate) -> Result<Vec<Holding>, EngineError> {
    let mut holdings: Vec<Holding> = Vec::new();
    for token in input.split(',') {
        let bad = || {
            EngineError::invalid_allocation(format!(
                "expected SYMBOL=SHARES@PRICE, got '{}'",
                token.trim()
            ))
        };
        let (symbol, rest) = token.split_once('=').ok_or_else(bad)?;
        let (shares, price) = rest.split_once('@').ok_or_else(bad)?;
        let symbol = symbol.trim().to_uppercase();
        let shares: f64 = shares.trim().parse().map_err(|_| bad())?;
        let price: f64 = price.trim().parse().map_err(|_| bad())?;
        if symbol.is_empty() || shares <= 0.0 || price <= 0.0 {
            return Err(bad());
        }
        if holdings.iter().any(|h| h.symbol == symbol) {
            return Err(EngineError::invalid_allocation(format!("duplicate symbol {symbol}")));
        }
        holdings.push(Holding::new(
            symbol.clone(),
            symbol,
            shares,
            price,
            entry_date,
            price,
        ));
    }
    Ok(holdings)
}

fn symbol_list(input: &str) -> Result<Vec<String>, EngineError> {
    parse_symbols(input).map_err(|e| EngineError::ConfigInvalid {
        section: "cli".into(),
        key: "symbols".into(),
        reason: e.to_string(),
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), EngineError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| EngineError::Database {
        reason: format!("failed to encode output: {e}"),
    })?;
    println!("{text}");
    Ok(())
}

fn run_validate(config_path: &PathBuf) -> Result<(), EngineError> {
    let config = load_config(config_path)?;
    let engine = load_engine_config(&config)?;
    eprintln!(
        "optimizer: allocation [{}, {}], {} iterations, risk tolerance {}",
        engine.optimizer.min_stock_allocation,
        engine.optimizer.max_stock_allocation,
        engine.optimizer.optimization_iterations,
        engine.optimizer.default_risk_tolerance
    );
    eprintln!(
        "tracker: benchmark {}, retention {} days",
        engine.tracker.benchmark_symbol, engine.tracker.retention_days
    );
    eprintln!("\nConfiguration is valid.");
    Ok(())
}

#[cfg(feature = "sqlite")]
mod engine {
    use std::sync::Arc;

    use crate::adapters::file_config_adapter::FileConfigAdapter;
    use crate::adapters::sqlite_adapter::SqliteAdapter;
    use crate::adapters::trend_oracle::TrendOracle;
    use crate::domain::config::load_engine_config;
    use crate::domain::error::EngineError;
    use crate::domain::service::{EnginePorts, UpgradeService};

    pub fn open_store(config: &FileConfigAdapter) -> Result<Arc<SqliteAdapter>, EngineError> {
        let store = SqliteAdapter::from_config(config)?;
        store.initialize_schema()?;
        Ok(Arc::new(store))
    }

    /// Wire an [`UpgradeService`] over one SQLite database.
    pub fn open_service(
        config: &FileConfigAdapter,
    ) -> Result<(Arc<SqliteAdapter>, UpgradeService), EngineError> {
        let engine_config = load_engine_config(config)?;
        let store = open_store(config)?;
        let oracle = TrendOracle::from_config(store.clone(), &engine_config.optimizer);
        let ports = EnginePorts {
            prices: store.clone(),
            oracle: Arc::new(oracle),
            portfolios: store.clone(),
            history: store.clone(),
            indicators: store.clone(),
        };
        Ok((store, UpgradeService::new(ports, engine_config)))
    }
}

#[cfg(not(feature = "sqlite"))]
fn sqlite_required(command: &str) -> Result<(), EngineError> {
    Err(EngineError::ConfigInvalid {
        section: "features".into(),
        key: "sqlite".into(),
        reason: format!("sqlite feature is required for {command}"),
    })
}

fn run_import(
    config_path: &PathBuf,
    dir: &PathBuf,
    symbols: Option<&str>,
) -> Result<(), EngineError> {
    #[cfg(feature = "sqlite")]
    {
        use crate::adapters::csv_adapter::{CsvAdapter, read_price_file};
        use crate::ports::price_port::PriceHistoryPort;

        let config = load_config(config_path)?;
        let store = engine::open_store(&config)?;

        let symbols = match symbols {
            Some(list) => symbol_list(list)?,
            None => CsvAdapter::new(dir.clone()).list_symbols()?,
        };

        let mut total = 0;
        for symbol in &symbols {
            let bars = read_price_file(&dir.join(format!("{symbol}.csv")), symbol)?;
            let inserted = store.insert_bars(&bars)?;
            info!(symbol = %symbol, bars = inserted, "imported prices");
            total += inserted;
        }
        eprintln!("Imported {total} bars for {} symbols", symbols.len());
        Ok(())
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = (config_path, dir, symbols);
        sqlite_required("import")
    }
}

fn run_info(config_path: &PathBuf, symbols: &str) -> Result<(), EngineError> {
    #[cfg(feature = "sqlite")]
    {
        let config = load_config(config_path)?;
        let store = engine::open_store(&config)?;

        for symbol in symbol_list(symbols)? {
            match store.get_data_range(&symbol)? {
                Some((min_date, max_date, count)) => {
                    println!("{symbol}: {count} bars, {min_date} to {max_date}");
                }
                None => eprintln!("{symbol}: no data found"),
            }
        }
        Ok(())
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = (config_path, symbols);
        sqlite_required("info")
    }
}

fn run_indicators(
    config_path: &PathBuf,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
    show: bool,
) -> Result<(), EngineError> {
    #[cfg(feature = "sqlite")]
    {
        let config = load_config(config_path)?;
        let (_, service) = engine::open_service(&config)?;
        if show {
            let stored = service.stored_indicators(&symbol.to_uppercase(), start, end)?;
            return print_json(&stored);
        }
        let snapshots = service.compute_indicators(&symbol.to_uppercase(), start, end)?;
        eprintln!("Stored {} snapshots for {}", snapshots.len(), symbol.to_uppercase());
        match snapshots.last() {
            Some(latest) => print_json(latest),
            None => Ok(()),
        }
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = (config_path, symbol, start, end, show);
        sqlite_required("indicators")
    }
}

fn run_predict(config_path: &PathBuf, symbols: &str) -> Result<(), EngineError> {
    #[cfg(feature = "sqlite")]
    {
        let config = load_config(config_path)?;
        let (_, service) = engine::open_service(&config)?;

        let mut predictions = Vec::new();
        for symbol in symbol_list(symbols)? {
            match service.predict(&symbol) {
                Ok(p) => predictions.push(p),
                Err(e) => eprintln!("{symbol}: {e}"),
            }
        }
        print_json(&predictions)
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = (config_path, symbols);
        sqlite_required("predict")
    }
}

fn run_create_portfolio(
    config_path: &PathBuf,
    id: i64,
    user_id: i64,
    name: &str,
    holdings: &str,
) -> Result<(), EngineError> {
    #[cfg(feature = "sqlite")]
    {
        use crate::domain::portfolio::Portfolio;
        use crate::ports::portfolio_port::PortfolioStore;

        let config = load_config(config_path)?;
        let store = engine::open_store(&config)?;
        let holdings = parse_holdings(holdings, Utc::now().date_naive())?;
        let portfolio = store.save(&Portfolio::new(id, user_id, name, holdings))?;
        info!(portfolio_id = portfolio.id, holdings = portfolio.stocks.len(), "portfolio saved");
        print_json(&portfolio)
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = (config_path, id, user_id, name, holdings);
        sqlite_required("create-portfolio")
    }
}

fn run_upgrade(
    config_path: &PathBuf,
    portfolio_id: i64,
    risk_tolerance: Option<f64>,
    expand: bool,
) -> Result<(), EngineError> {
    #[cfg(feature = "sqlite")]
    {
        let config = load_config(config_path)?;
        let (_, service) = engine::open_service(&config)?;
        let recommendation =
            service.generate_upgrade(portfolio_id, risk_tolerance, expand, Utc::now())?;
        for skipped in &recommendation.omitted {
            eprintln!("skipped {}: {}", skipped.symbol, skipped.reason);
        }
        print_json(&recommendation)
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = (config_path, portfolio_id, risk_tolerance, expand);
        sqlite_required("upgrade")
    }
}

fn run_apply(config_path: &PathBuf, portfolio_id: i64, allocations: &str) -> Result<(), EngineError> {
    #[cfg(feature = "sqlite")]
    {
        let config = load_config(config_path)?;
        let allocations = parse_allocations(allocations)?;
        let (_, service) = engine::open_service(&config)?;
        let portfolio = service.apply_upgrade(portfolio_id, &allocations, Utc::now())?;
        print_json(&portfolio)
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = (config_path, portfolio_id, allocations);
        sqlite_required("apply")
    }
}

fn run_history(config_path: &PathBuf, portfolio_id: i64) -> Result<(), EngineError> {
    #[cfg(feature = "sqlite")]
    {
        let config = load_config(config_path)?;
        let (_, service) = engine::open_service(&config)?;
        print_json(&service.history(portfolio_id)?)
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = (config_path, portfolio_id);
        sqlite_required("history")
    }
}

fn run_serve(config_path: &PathBuf) -> Result<(), EngineError> {
    #[cfg(all(feature = "web", feature = "sqlite"))]
    {
        use crate::ports::config_port::ConfigPort;
        use std::net::SocketAddr;
        use std::sync::Arc;

        let config = load_config(config_path)?;
        let (_, service) = engine::open_service(&config)?;

        let bind = config
            .get_string("server", "bind")
            .unwrap_or_else(|| "127.0.0.1:8080".to_string());
        let addr: SocketAddr = bind.parse().map_err(|_| EngineError::ConfigInvalid {
            section: "server".into(),
            key: "bind".into(),
            reason: format!("'{bind}' is not a socket address"),
        })?;

        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(crate::adapters::web::serve(Arc::new(service), addr))
    }

    #[cfg(not(all(feature = "web", feature = "sqlite")))]
    {
        let _ = config_path;
        Err(EngineError::ConfigInvalid {
            section: "features".into(),
            key: "web".into(),
            reason: "web and sqlite features are required for serve".into(),
        })
    }
}
