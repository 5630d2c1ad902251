//! Background expiry sweeper
//!
//! Hygiene only: every read path re-validates `expires_at` against the
//! clock, so a late or absent sweeper never produces an incorrect grant.
//! Sweeping keeps the stored statuses honest for dashboards and history
//! queries.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use turnstile_store::{Store, StoreResult};

use crate::CoreEvent;

/// Periodic task transitioning stale active sessions to expired.
///
/// Runs independently of the issuer and never takes its per-account
/// locks; the race with a concurrent read is benign because both sides
/// check wall-clock time.
pub struct Sweeper {
    store: Arc<dyn Store>,
    interval: Duration,
    events: mpsc::UnboundedSender<CoreEvent>,
}

impl Sweeper {
    pub fn new(
        store: Arc<dyn Store>,
        interval: Duration,
        events: mpsc::UnboundedSender<CoreEvent>,
    ) -> Self {
        Self {
            store,
            interval,
            events,
        }
    }

    /// Spawn the sweep loop onto the runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "Sweeper running");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match sweep_once(self.store.as_ref()) {
                Ok(0) => {}
                Ok(count) => {
                    debug!(count, "Stale sessions expired");
                    let _ = self.events.send(CoreEvent::SessionsExpired { count });
                }
                Err(e) => {
                    warn!(error = %e, "Sweep failed");
                }
            }
        }
    }
}

/// One sweep pass at the current clock
pub fn sweep_once(store: &dyn Store) -> StoreResult<usize> {
    store.sweep_expired(turnstile_util::now())
}
