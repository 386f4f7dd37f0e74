//! JSON HTTP adapter over [`UpgradeService`].
//!
//! Every handler runs the synchronous engine operation for its route and maps
//! [`EngineError`](crate::domain::error::EngineError) to an HTTP status via
//! [`WebError`]. [`serve`] also owns the periodic performance sweep.

mod error;
mod handlers;
pub mod scheduler;

pub use error::{WebError, status_from_error};
pub use handlers::*;

use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::domain::error::EngineError;
use crate::domain::service::UpgradeService;

pub struct AppState {
    pub service: Arc<UpgradeService>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/portfolios/{id}", get(handlers::get_portfolio))
        .route("/portfolios/{id}/upgrade", post(handlers::generate_upgrade))
        .route("/portfolios/{id}/apply", post(handlers::apply_upgrade))
        .route("/portfolios/{id}/history", get(handlers::get_history))
        .route("/portfolios/{id}/performance", get(handlers::get_performance))
        .route("/performance/stats", get(handlers::aggregate_stats))
        .route("/predictions", get(handlers::predictions))
        .route("/indicators/{symbol}", post(handlers::compute_indicators))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Bind `addr`, start the sweep scheduler and serve until the process exits.
pub async fn serve(service: Arc<UpgradeService>, addr: SocketAddr) -> Result<(), EngineError> {
    let sweeper = scheduler::spawn_sweep_task(
        Arc::clone(&service),
        scheduler::sweep_period(&service),
    );

    let app = build_router(AppState { service });
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    let result = axum::serve(listener, app).await;
    sweeper.abort();
    result.map_err(EngineError::from)
}
