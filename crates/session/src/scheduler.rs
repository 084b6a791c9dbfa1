//! Proactive refresh scheduling
//!
//! Arms a timer against the stored pair's expiry minus a safety margin and
//! drives the coordinator when it fires. The timer re-arms itself from each
//! refreshed pair's server-reported expiry, so a session that stays quiet
//! still rolls its credential ahead of time.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::{RefreshCoordinator, RefreshReason};

struct ArmedTimer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Timer that refreshes the credential before it expires
pub struct ProactiveScheduler {
    coordinator: Arc<RefreshCoordinator>,
    margin_seconds: i64,
    timer: Mutex<Option<ArmedTimer>>,
}

impl ProactiveScheduler {
    pub(crate) fn new(coordinator: Arc<RefreshCoordinator>, margin_seconds: i64) -> Self {
        Self {
            coordinator,
            margin_seconds,
            timer: Mutex::new(None),
        }
    }

    /// Arm the timer for the given expiry instant, replacing any armed timer.
    ///
    /// An expiry already inside the margin fires immediately. The spawned
    /// loop re-arms itself from each successful refresh and exits on the
    /// first failure, leaving recovery to the reactive path.
    pub fn arm(&self, expires_at: DateTime<Utc>) {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let coordinator = Arc::clone(&self.coordinator);
        let margin = self.margin_seconds;

        let handle = tokio::spawn(async move {
            let mut deadline = expires_at;
            loop {
                let sleep = Self::sleep_until(deadline, margin);
                debug!(sleep_ms = sleep.as_millis() as u64, expires_at = %deadline, "proactive refresh armed");

                tokio::select! {
                    () = task_cancel.cancelled() => {
                        debug!("proactive refresh disarmed");
                        return;
                    }
                    () = tokio::time::sleep(sleep) => {}
                }

                match coordinator.refresh(RefreshReason::Proactive).await {
                    Ok(pair) => {
                        info!(expires_at = %pair.expires_at, "proactive refresh completed");
                        deadline = pair.expires_at;
                    }
                    Err(err) => {
                        // Reactive refresh takes over from here
                        warn!(error = %err, "proactive refresh failed, stopping timer");
                        return;
                    }
                }
            }
        });

        let previous = {
            let mut timer = self.timer.lock();
            timer.replace(ArmedTimer { cancel, handle })
        };
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    /// Stop the timer without touching any in-flight refresh.
    pub fn disarm(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.cancel.cancel();
            timer.handle.abort();
        }
    }

    /// Whether a timer task is currently armed.
    pub fn is_armed(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.handle.is_finished())
    }

    /// Time to sleep before refreshing a pair that expires at `deadline`.
    fn sleep_until(deadline: DateTime<Utc>, margin_seconds: i64) -> std::time::Duration {
        let fire_at = deadline - ChronoDuration::seconds(margin_seconds);
        let millis = (fire_at - Utc::now()).num_milliseconds().max(0);
        std::time::Duration::from_millis(millis as u64)
    }
}

impl Drop for ProactiveScheduler {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.cancel.cancel();
            timer.handle.abort();
        }
    }
}
