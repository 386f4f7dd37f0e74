//! Candidate universe for an optimization run.
//!
//! Held symbols always take part. Expansion candidates come from the symbol
//! catalog, minus what is already held, ranked by confidence-weighted
//! predicted return.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::domain::prediction::Prediction;

#[derive(Debug, Clone, thiserror::Error)]
pub enum UniverseError {
    #[error("empty token in symbol list")]
    EmptyToken,

    #[error("duplicate symbol: {0}")]
    DuplicateSymbol(String),
}

/// Parse a comma-separated symbol list, uppercasing and rejecting blanks or
/// duplicates.
pub fn parse_symbols(input: &str) -> Result<Vec<String>, UniverseError> {
    let mut symbols = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(UniverseError::EmptyToken);
        }
        let symbol = trimmed.to_uppercase();
        if !seen.insert(symbol.clone()) {
            return Err(UniverseError::DuplicateSymbol(symbol));
        }
        symbols.push(symbol);
    }

    Ok(symbols)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    NoPrediction,
    NoSnapshot,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoPrediction => f.write_str("no prediction"),
            SkipReason::NoSnapshot => f.write_str("no indicator snapshot"),
        }
    }
}

/// A symbol left out of scoring. Held symbols are pinned at their previous
/// weight instead of being dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSymbol {
    pub symbol: String,
    pub reason: SkipReason,
    pub pinned: bool,
}

/// Catalog symbols not already held, in catalog order.
pub fn expansion_pool(catalog: &BTreeSet<String>, held: &[String]) -> Vec<String> {
    catalog
        .iter()
        .filter(|symbol| !held.contains(symbol))
        .cloned()
        .collect()
}

fn expansion_rank(prediction: &Prediction) -> f64 {
    prediction.predicted_change_percentage * prediction.confidence_score
}

/// Best `limit` predictions by `predicted_change_percentage * confidence`,
/// ties broken by symbol.
pub fn rank_expansion_candidates(mut predictions: Vec<Prediction>, limit: usize) -> Vec<Prediction> {
    predictions.sort_by(|a, b| {
        expansion_rank(b)
            .partial_cmp(&expansion_rank(a))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    predictions.truncate(limit);
    predictions
}
