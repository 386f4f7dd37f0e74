//! Domain error types.
//!
//! One tagged enum for every failure the engine can surface. Callers map it to
//! their own status space through [`EngineError::status`] (HTTP) or the
//! `ExitCode` conversion (CLI).

/// Coarse classification of an [`EngineError`] for boundary mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    /// The caller sent something it can fix (400-class).
    Client,
    /// The referenced entity does not exist (404).
    NotFound,
    /// The server failed (500-class).
    Server,
}

/// Top-level error type for the optimization engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("insufficient data for {symbol}: have {bars} bars, need {minimum}")]
    InsufficientData {
        symbol: String,
        bars: usize,
        minimum: usize,
    },

    #[error("prediction failed for {symbol}: {source}")]
    PredictionFailed {
        symbol: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("oracle returned no prediction: {reason}")]
    OracleUnavailable { reason: String },

    #[error("invalid allocation: {reason}")]
    InvalidAllocation { reason: String },

    #[error("optimization failed for portfolio {portfolio_id}: {reason}")]
    OptimizationFailed { portfolio_id: i64, reason: String },

    #[error("portfolio {portfolio_id} not found")]
    PortfolioNotFound { portfolio_id: i64 },

    #[error("no price available for {symbol}")]
    NoPrice { symbol: String },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn invalid_allocation(reason: impl Into<String>) -> Self {
        EngineError::InvalidAllocation {
            reason: reason.into(),
        }
    }

    pub fn optimization_failed(portfolio_id: i64, reason: impl Into<String>) -> Self {
        EngineError::OptimizationFailed {
            portfolio_id,
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> ErrorStatus {
        match self {
            EngineError::InsufficientData { .. }
            | EngineError::InvalidAllocation { .. }
            | EngineError::ConfigMissing { .. }
            | EngineError::ConfigInvalid { .. }
            | EngineError::ConfigParse { .. } => ErrorStatus::Client,
            EngineError::PortfolioNotFound { .. } => ErrorStatus::NotFound,
            EngineError::PredictionFailed { .. }
            | EngineError::OracleUnavailable { .. }
            | EngineError::OptimizationFailed { .. }
            | EngineError::NoPrice { .. }
            | EngineError::Database { .. }
            | EngineError::DatabaseQuery { .. }
            | EngineError::Io(_) => ErrorStatus::Server,
        }
    }
}

impl From<&EngineError> for std::process::ExitCode {
    fn from(err: &EngineError) -> Self {
        let code: u8 = match err {
            EngineError::Io(_) => 1,
            EngineError::ConfigParse { .. }
            | EngineError::ConfigMissing { .. }
            | EngineError::ConfigInvalid { .. } => 2,
            EngineError::Database { .. } | EngineError::DatabaseQuery { .. } => 3,
            EngineError::InvalidAllocation { .. } | EngineError::OptimizationFailed { .. } => 4,
            EngineError::InsufficientData { .. }
            | EngineError::NoPrice { .. }
            | EngineError::PortfolioNotFound { .. } => 5,
            EngineError::PredictionFailed { .. } | EngineError::OracleUnavailable { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
