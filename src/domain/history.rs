//! Append-only audit trail of portfolio allocation changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::portfolio::Portfolio;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Creation,
    Update,
    AiRecommendation,
    Rebalance,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Creation => "CREATION",
            ChangeType::Update => "UPDATE",
            ChangeType::AiRecommendation => "AI_RECOMMENDATION",
            ChangeType::Rebalance => "REBALANCE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATION" => Some(ChangeType::Creation),
            "UPDATE" => Some(ChangeType::Update),
            "AI_RECOMMENDATION" => Some(ChangeType::AiRecommendation),
            "REBALANCE" => Some(ChangeType::Rebalance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeSource {
    User,
    Ai,
    Scheduled,
}

impl ChangeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeSource::User => "USER",
            ChangeSource::Ai => "AI",
            ChangeSource::Scheduled => "SCHEDULED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "USER" => Some(ChangeSource::User),
            "AI" => Some(ChangeSource::Ai),
            "SCHEDULED" => Some(ChangeSource::Scheduled),
            _ => None,
        }
    }
}

/// Allocations are percent weights keyed by symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub portfolio_id: i64,
    pub user_id: i64,
    pub change_type: ChangeType,
    pub change_date: DateTime<Utc>,
    pub previous_allocations: BTreeMap<String, f64>,
    pub new_allocations: BTreeMap<String, f64>,
    pub previous_value: f64,
    pub new_value: f64,
    pub risk_tolerance: f64,
    pub change_source: ChangeSource,
}

impl HistoryRecord {
    /// Record describing the move from `previous` to `current`.
    pub fn between(
        previous: &Portfolio,
        current: &Portfolio,
        change_type: ChangeType,
        change_source: ChangeSource,
        risk_tolerance: f64,
        change_date: DateTime<Utc>,
    ) -> Self {
        HistoryRecord {
            portfolio_id: current.id,
            user_id: current.user_id,
            change_type,
            change_date,
            previous_allocations: previous.allocations(),
            new_allocations: current.allocations(),
            previous_value: previous.total_value,
            new_value: current.total_value,
            risk_tolerance,
            change_source,
        }
    }

    pub fn value_change(&self) -> f64 {
        self.new_value - self.previous_value
    }
}
