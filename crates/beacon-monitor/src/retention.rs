//! Periodic purge of old status-change events.

use std::time::Duration;

use beacon_storage::{Repository, StorageError};
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How often the sweep runs.
pub const SWEEP_PERIOD: Duration = Duration::from_secs(3600);

/// Delete events older than `retention`. Returns how many were removed.
pub async fn sweep(repo: &Repository, retention: Duration) -> Result<usize, StorageError> {
    let horizon = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
    let cutoff = Utc::now()
        .checked_sub_signed(horizon)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
    repo.purge_status_changes(cutoff).await
}

/// Sweep now and then every `period` until cancelled.
pub fn spawn_sweeper(
    repo: Repository,
    retention: Duration,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => match sweep(&repo, retention).await {
                    Ok(0) => {}
                    Ok(removed) => info!("Retention sweep removed {} status changes", removed),
                    Err(e) => warn!("Retention sweep failed: {}", e),
                },
            }
        }
    })
}
