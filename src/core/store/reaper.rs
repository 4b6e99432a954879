// src/core/store/reaper.rs

//! Background reaper for stale `files` rows. The specification requires
//! reaping on every master boot; the original's `services/cleanup/service.py`
//! also reaps on an interval, so this carries both: a one-shot sweep at boot
//! and a recurring sweep every ten minutes for as long as this node is master.

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use super::Store;

const REAP_INTERVAL: Duration = Duration::from_secs(600);

impl Store {
    /// Deletes `files` rows older than `max_age`. Returns the number reaped.
    pub async fn reap_stale_files(&self, max_age: Duration) -> Result<u64, crate::core::errors::HostctlError> {
        let result = sqlx::query(
            "DELETE FROM files WHERE created < now() - ($1 || ' seconds')::interval",
        )
        .bind(max_age.as_secs().to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Runs the boot-time sweep followed by a 10-minute recurring tick until
/// `shutdown_rx` fires. Intended to be spawned only on the current master.
pub async fn run(store: Store, max_age: Duration, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), crate::core::errors::HostctlError> {
    match store.reap_stale_files(max_age).await {
        Ok(n) if n > 0 => info!(reaped = n, "reaped stale file rows at boot"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "boot-time file reap failed"),
    }

    let mut interval = tokio::time::interval(REAP_INTERVAL);
    interval.tick().await; // consume the immediate first tick, already handled above

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match store.reap_stale_files(max_age).await {
                    Ok(n) if n > 0 => info!(reaped = n, "reaped stale file rows"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "periodic file reap failed"),
                }
            }
            _ = shutdown_rx.recv() => {
                info!("file reaper shutting down");
                break;
            }
        }
    }
    Ok(())
}
