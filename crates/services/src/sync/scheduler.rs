use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use lms_core::time::parse_timestamp;
use storage::keys::LAST_SYNC;
use storage::repository::KeyValueStore;

use crate::config::DEFAULT_SYNC_INTERVAL;
use crate::error::SyncError;
use crate::sync::client::RemoteSync;
use crate::sync::reconcile::{ReconcileSummary, Reconciler};
use crate::Clock;

// ─── STATE ─────────────────────────────────────────────────────────────────

/// The in-progress flag and the time the last run finished.
#[derive(Debug, Default)]
pub struct SyncState {
    syncing: AtomicBool,
    last_sync_time: Mutex<Option<DateTime<Utc>>>,
}

/// Clears the in-progress flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncState {
    fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(&self.syncing))
    }

    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        *self.last()
    }

    fn set_last_sync_time(&self, at: DateTime<Utc>) {
        *self.last() = Some(at);
    }

    fn last(&self) -> MutexGuard<'_, Option<DateTime<Utc>>> {
        self.last_sync_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ─── SCHEDULER ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SyncRunOutcome {
    Completed(ReconcileSummary),
    /// Another run was in flight.
    Skipped,
    /// The pull failed; the next tick tries again.
    Failed(SyncError),
    /// No read endpoint is configured.
    Disabled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncStatus {
    pub syncing: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub interval: Duration,
}

/// Pulls the remote sheet on a fixed interval and reconciles it locally.
///
/// At most one pull runs at a time; a trigger that finds one in flight is
/// skipped, not queued.
pub struct SyncScheduler {
    remote: Option<Arc<dyn RemoteSync>>,
    reconciler: Reconciler,
    kv: Arc<dyn KeyValueStore>,
    clock: Clock,
    interval: Duration,
    state: SyncState,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl SyncScheduler {
    /// Build a scheduler, restoring the persisted last-sync time.
    ///
    /// A zero `interval` is replaced by [`DEFAULT_SYNC_INTERVAL`].
    pub async fn load(
        remote: Option<Arc<dyn RemoteSync>>,
        reconciler: Reconciler,
        kv: Arc<dyn KeyValueStore>,
        clock: Clock,
        interval: Duration,
    ) -> Self {
        let interval = if interval.is_zero() {
            warn!(
                default_secs = DEFAULT_SYNC_INTERVAL.as_secs(),
                "zero sync interval, using default"
            );
            DEFAULT_SYNC_INTERVAL
        } else {
            interval
        };
        let state = SyncState::default();
        match kv.get(LAST_SYNC).await {
            Ok(Some(raw)) => {
                if let Some(at) = parse_timestamp(&raw) {
                    state.set_last_sync_time(at);
                }
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "last sync time unreadable"),
        }
        Self {
            remote,
            reconciler,
            kv,
            clock,
            interval,
            state,
            shutdown: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            syncing: self.state.is_syncing(),
            last_sync_time: self.state.last_sync_time(),
            interval: self.interval,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Pull once and reconcile, unless a run is already in flight.
    ///
    /// Failures are logged and returned, never propagated as errors.
    pub async fn sync_now(&self) -> SyncRunOutcome {
        let Some(remote) = self.remote.as_ref().filter(|r| r.can_pull()) else {
            debug!("no read endpoint configured, sync disabled");
            return SyncRunOutcome::Disabled;
        };
        let Some(_run) = self.state.try_begin() else {
            debug!("sync already in progress, skipping");
            return SyncRunOutcome::Skipped;
        };

        let outcome = match remote.pull().await {
            Ok(snapshot) => {
                let summary = self.reconciler.apply(&snapshot).await;
                info!(
                    rows = summary.users_seen,
                    updated = summary.users_updated,
                    added = summary.chapters_added,
                    malformed = summary.malformed_rows,
                    "sync completed"
                );
                SyncRunOutcome::Completed(summary)
            }
            Err(err) => {
                warn!(error = %err, "sync failed, retrying next interval");
                SyncRunOutcome::Failed(err)
            }
        };
        self.stamp().await;
        outcome
    }

    /// Run `sync_now` immediately and then every interval.
    ///
    /// Returns `false` if the loop was already running. Must be called from
    /// within a tokio runtime.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut running = self.running();
        if running.is_some() {
            return false;
        }
        let (tx, rx) = watch::channel(false);
        *running = Some(tx);
        drop(running);

        tokio::spawn(run_loop(Arc::downgrade(self), self.interval, rx));
        info!(interval_secs = self.interval.as_secs(), "sync scheduler started");
        true
    }

    /// Cancel the interval. In-flight runs finish on their own.
    ///
    /// Safe to call repeatedly or when not running.
    pub fn stop(&self) -> bool {
        let Some(tx) = self.running().take() else {
            return false;
        };
        let _ = tx.send(true);
        info!("sync scheduler stopped");
        true
    }

    async fn stamp(&self) {
        let now = self.clock.now();
        self.state.set_last_sync_time(now);
        if let Err(err) = self.kv.put(LAST_SYNC, &now.to_rfc3339()).await {
            warn!(error = %err, "last sync time not persisted");
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<watch::Sender<bool>>> {
        self.shutdown.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_loop(
    scheduler: Weak<SyncScheduler>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(scheduler) = scheduler.upgrade() else {
                    break;
                };
                tokio::spawn(async move {
                    scheduler.sync_now().await;
                });
            }
        }
    }
}
