//! HTTP request handlers for web adapter.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::universe::parse_symbols;

use super::{AppState, WebError};

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    tracked_recommendations: usize,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        tracked_recommendations: state.service.tracker().len(),
    })
}

#[derive(Debug, Deserialize)]
pub struct UpgradeRequest {
    pub risk_tolerance: Option<f64>,
    #[serde(default)]
    pub expand_universe: bool,
}

pub async fn generate_upgrade(
    State(state): State<Arc<AppState>>,
    Path(portfolio_id): Path<i64>,
    Json(request): Json<UpgradeRequest>,
) -> Result<Response, WebError> {
    let recommendation = state.service.generate_upgrade(
        portfolio_id,
        request.risk_tolerance,
        request.expand_universe,
        Utc::now(),
    )?;
    Ok(Json(recommendation).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    pub allocations: BTreeMap<String, f64>,
}

pub async fn apply_upgrade(
    State(state): State<Arc<AppState>>,
    Path(portfolio_id): Path<i64>,
    Json(request): Json<ApplyRequest>,
) -> Result<Response, WebError> {
    if request.allocations.is_empty() {
        return Err(WebError::bad_request("allocations must not be empty"));
    }
    let portfolio = state
        .service
        .apply_upgrade(portfolio_id, &request.allocations, Utc::now())?;
    Ok(Json(portfolio).into_response())
}

pub async fn get_portfolio(
    State(state): State<Arc<AppState>>,
    Path(portfolio_id): Path<i64>,
) -> Result<Response, WebError> {
    let portfolio = state.service.portfolio(portfolio_id)?;
    Ok(Json(portfolio).into_response())
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(portfolio_id): Path<i64>,
) -> Result<Response, WebError> {
    let records = state.service.history(portfolio_id)?;
    Ok(Json(records).into_response())
}

pub async fn get_performance(
    State(state): State<Arc<AppState>>,
    Path(portfolio_id): Path<i64>,
) -> Result<Response, WebError> {
    let report = state
        .service
        .get_performance(portfolio_id, Utc::now().date_naive());
    if !report.found {
        return Err(WebError::not_found(format!(
            "no tracked recommendation for portfolio {portfolio_id}"
        )));
    }
    Ok(Json(report).into_response())
}

pub async fn aggregate_stats(State(state): State<Arc<AppState>>) -> Response {
    Json(state.service.get_aggregate_stats()).into_response()
}

#[derive(Debug, Deserialize)]
pub struct PredictionQuery {
    pub symbols: String,
}

#[derive(Serialize)]
struct PredictionFailure {
    symbol: String,
    error: String,
}

#[derive(Serialize)]
struct PredictionBatch {
    predictions: Vec<crate::domain::prediction::Prediction>,
    failures: Vec<PredictionFailure>,
}

/// Predictions for a comma-separated `symbols` list. One symbol failing does
/// not fail the others.
pub async fn predictions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PredictionQuery>,
) -> Result<Response, WebError> {
    let symbols =
        parse_symbols(&query.symbols).map_err(|e| WebError::bad_request(e.to_string()))?;

    let mut batch = PredictionBatch {
        predictions: Vec::with_capacity(symbols.len()),
        failures: Vec::new(),
    };
    for symbol in symbols {
        match state.service.predict(&symbol) {
            Ok(p) => batch.predictions.push(p),
            Err(e) => batch.failures.push(PredictionFailure {
                symbol,
                error: e.to_string(),
            }),
        }
    }
    Ok(Json(batch).into_response())
}

#[derive(Debug, Deserialize)]
pub struct IndicatorRange {
    pub start_date: String,
    pub end_date: String,
}

fn parse_date(value: &str, field: &str) -> Result<NaiveDate, WebError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| WebError::bad_request(format!("invalid {field} (expected YYYY-MM-DD)")))
}

pub async fn compute_indicators(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Json(range): Json<IndicatorRange>,
) -> Result<Response, WebError> {
    let start = parse_date(&range.start_date, "start_date")?;
    let end = parse_date(&range.end_date, "end_date")?;
    if start > end {
        return Err(WebError::bad_request("start_date is after end_date"));
    }
    let snapshots = state
        .service
        .compute_indicators(&symbol.to_uppercase(), start, end)?;
    Ok((StatusCode::CREATED, Json(snapshots)).into_response())
}

pub async fn not_found() -> WebError {
    WebError::not_found("no such route")
}
