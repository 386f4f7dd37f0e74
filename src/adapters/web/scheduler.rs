//! Periodic performance sweep.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info};

use crate::domain::service::UpgradeService;
use crate::domain::tracker::SweepSummary;

/// Run one sweep off the async runtime.
pub async fn sweep_once(service: Arc<UpgradeService>) -> Option<SweepSummary> {
    let result =
        tokio::task::spawn_blocking(move || service.run_sweep(Utc::now().date_naive())).await;
    match result {
        Ok(summary) => {
            info!(
                updated = summary.updated,
                evicted = summary.evicted,
                failed = summary.failed,
                "performance sweep complete"
            );
            Some(summary)
        }
        Err(e) => {
            error!(error = %e, "performance sweep task panicked");
            None
        }
    }
}

/// Spawn the sweep loop. The first sweep runs one full `period` after start;
/// abort the returned handle to stop it.
pub fn spawn_sweep_task(service: Arc<UpgradeService>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = period.as_secs(), "performance sweep scheduler started");

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            sweep_once(Arc::clone(&service)).await;
        }
    })
}

/// Sweep period from `[tracker] sweep_interval_hours`.
pub fn sweep_period(service: &UpgradeService) -> Duration {
    Duration::from_secs(service.config().tracker.sweep_interval_hours.max(1) * 3600)
}
