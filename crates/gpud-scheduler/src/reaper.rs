//! Session timeout enforcement

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::registry::SessionRegistry;

/// Background task enforcing idle and max-lifetime timeouts.
///
/// Each sweep collects kill decisions first and applies them afterwards, so
/// the registry is never mutated while being scanned.
pub struct TimeoutReaper {
    registry: Arc<SessionRegistry>,
    interval: Duration,
}

impl TimeoutReaper {
    pub fn new(registry: Arc<SessionRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    pub async fn run(self) {
        info!(
            interval_seconds = self.interval.as_secs(),
            "starting session timeout reaper"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a fresh daemon does a
        // full interval before the first sweep.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    /// One pass over all sessions.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let mut decisions: Vec<(Uuid, &'static str)> = Vec::new();

        for session in self.registry.snapshot().await {
            if let Some(reason) = session.timeout_reason(now) {
                decisions.push((session.session_id, reason));
            }
        }

        for (session_id, reason) in &decisions {
            let _ = self.registry.kill(*session_id, reason).await;
        }

        if !decisions.is_empty() {
            info!(killed = decisions.len(), "reaped timed-out sessions");
        } else {
            debug!("reaper sweep found nothing to kill");
        }
    }
}
