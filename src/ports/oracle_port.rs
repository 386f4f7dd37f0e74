//! Prediction oracle port trait.
//!
//! The oracle is opaque: the engine only consumes its output and treats any
//! error as a per-symbol failure.

use crate::domain::error::EngineError;
use crate::domain::prediction::Prediction;

pub trait PredictionOracle: Send + Sync {
    fn predict(&self, symbol: &str) -> Result<Prediction, EngineError>;
}
