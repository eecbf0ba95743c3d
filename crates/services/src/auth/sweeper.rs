use super::engine::SessionEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Periodically deletes sessions past the retention window, along with
/// OAuth states whose callback never came.
pub struct ExpirySweeper;

impl ExpirySweeper {
    /// Run the sweep now and then every `interval` on a background task.
    pub fn spawn(engine: Arc<SessionEngine>, retention_days: u32, interval: Duration) -> JoinHandle<()> {
        info!(
            "Session expiry sweeper started: retention {} days, interval {} seconds",
            retention_days,
            interval.as_secs()
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            loop {
                interval.tick().await;
                debug!("Running session expiry sweep");
                if let Err(e) = engine.prune_expired_sessions(retention_days).await {
                    error!("Session expiry sweep failed, will retry on next interval: {}", e);
                }
                if let Err(e) = engine.prune_stale_states().await {
                    error!("Login state sweep failed: {}", e);
                }
            }
        })
    }
}
