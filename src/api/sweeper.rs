//! Fixed-interval maintenance sweep.
//!
//! Two idempotent deletes per tick: revocation records past their natural
//! expiry (plus stale tombstones) and inactive sessions idle beyond the
//! retention window. No overlap guard is needed; a slow tick just repeats
//! work the next one would have done anyway.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::handlers::auth::AuthState;

pub fn spawn(state: Arc<AuthState>) {
    let interval = Duration::from_secs(state.config.sweep_interval_seconds());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;

            match state.revocation.prune_expired().await {
                Ok(0) => {}
                Ok(pruned) => debug!("Pruned {pruned} expired revocation row(s)"),
                Err(err) => warn!("Revocation prune failed: {err:#}"),
            }

            match state
                .registry
                .garbage_collect(state.config.session_retention_days())
                .await
            {
                Ok(0) => {}
                Ok(collected) => debug!("Garbage collected {collected} inactive session(s)"),
                Err(err) => warn!("Session garbage collection failed: {err:#}"),
            }
        }
    });
}
