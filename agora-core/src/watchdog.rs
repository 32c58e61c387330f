//! Watchdog supervisor for abandoned conversation locks
//!
//! A background loop that periodically scans the lock registry for locks
//! held longer than any legitimate operation could need and forcibly
//! recovers them, so a hung remote call can never permanently wedge a
//! conversation. The supervisor is infrastructure that must outlive the
//! failures it recovers from: a fault while handling one key never stops
//! supervision of the rest of the system.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WatchdogConfig;
use crate::conversation::ConversationStore;
use crate::locks::LockRegistry;

/// Background supervisor over the lock registry and conversation store
pub struct Watchdog {
    locks: Arc<LockRegistry>,
    store: Arc<ConversationStore>,
    config: WatchdogConfig,
}

impl Watchdog {
    /// Create a watchdog over the given registries
    pub fn new(
        locks: Arc<LockRegistry>,
        store: Arc<ConversationStore>,
        config: WatchdogConfig,
    ) -> Self {
        Self {
            locks,
            store,
            config,
        }
    }

    /// Maximum duration a lock may be held before it is treated as abandoned.
    ///
    /// The ceiling exceeds the slowest legitimate operation by the recovery
    /// buffer, so an operation gets the chance to fail and release the lock
    /// on its own before the watchdog steps in.
    pub fn max_lock_duration(&self) -> Duration {
        self.config.operation_timeout + self.config.recovery_buffer
    }

    /// Spawn the supervision loop.
    ///
    /// Runs on `scan_interval` until the returned handle is shut down.
    /// Must be called from within a Tokio runtime.
    pub fn spawn(self) -> WatchdogHandle {
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.scan_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // an interval's first tick completes immediately; consume it so
            // the first scan happens one full interval after start
            ticker.tick().await;

            info!(
                interval_secs = self.config.scan_interval.as_secs(),
                max_lock_secs = self.max_lock_duration().as_secs(),
                "watchdog started"
            );
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => {
                        info!("watchdog stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.scan().await;
                    }
                }
            }
        });

        WatchdogHandle { cancel, task }
    }

    /// One supervision pass.
    ///
    /// Every fault is absorbed and logged here; the loop must keep ticking.
    async fn scan(&self) {
        let max_lock_duration = self.max_lock_duration();
        let stuck = self.locks.list_stuck(max_lock_duration);
        if !stuck.is_empty() {
            warn!(
                count = stuck.len(),
                max_lock_secs = max_lock_duration.as_secs(),
                "found stuck conversation locks"
            );
        }

        for key in stuck {
            // reconcile state flags first so the next successful operation
            // can surface the timeout; the conversation may no longer exist
            if self.store.mark_timed_out(&key).await {
                debug!(%key, "marked conversation as timed out");
            }

            if self.locks.force_release(&key) {
                info!(%key, "recovered stuck conversation lock");
            } else {
                // stays eligible for the next scan
                error!(%key, "failed to recover stuck conversation lock");
            }
        }

        if let Some(max_age) = self.config.idle_max_age {
            let reaped = self.store.reap_idle(max_age).await;
            if reaped > 0 {
                debug!(reaped, "evicted idle conversations");
            }
        }
    }
}

/// Handle to a running watchdog task
pub struct WatchdogHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchdogHandle {
    /// Stop the loop and wait for it to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(error) = self.task.await {
            warn!(%error, "watchdog task did not shut down cleanly");
        }
    }
}
