//! Periodic maintenance: FAQ expiry sweep and idle-session pruning.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use askdesk_assistant::{FaqCache, SessionStore};

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Drop expired FAQ entries every `interval` until shutdown.
pub fn spawn_faq_purge(faq: Arc<FaqCache>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = faq.purge_expired();
                    debug!(purged, remaining = faq.len(), "faq sweep");
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("faq sweep stopped");
    })
}

/// Remove sessions idle for longer than `idle` every `interval` until shutdown.
pub fn spawn_session_prune(
    sessions: Arc<dyn SessionStore>,
    idle: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => match sessions.prune_inactive(idle).await {
                    Ok(0) => {}
                    Ok(pruned) => info!(pruned, idle_secs = idle.as_secs(), "idle sessions pruned"),
                    Err(e) => warn!(error = %e, "session prune failed"),
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("session prune stopped");
    })
}
