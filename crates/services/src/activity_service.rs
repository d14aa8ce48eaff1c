use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

use lms_core::model::{
    append_bounded, ActivityEntry, ActivityKind, ChapterKey, UserId, ACTIVITY_LOG_CAPACITY,
};
use storage::keys::ACTIVITIES;
use storage::repository::{load_json, save_json, KeyValueStore};

use crate::Clock;

/// Bounded log of learner activity shared by all users.
///
/// Writes are best-effort. A log the backend refuses is kept in memory and
/// served from there until a later write succeeds.
pub struct ActivityLog {
    kv: Arc<dyn KeyValueStore>,
    clock: Clock,
    shadow: Mutex<Option<Vec<ActivityEntry>>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl ActivityLog {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Clock) -> Self {
        Self {
            kv,
            clock,
            shadow: Mutex::new(None),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Append an entry, evicting the oldest beyond capacity.
    pub async fn record(
        &self,
        user: &UserId,
        kind: ActivityKind,
        chapter: Option<&ChapterKey>,
        detail: impl Into<String>,
    ) -> ActivityEntry {
        let entry = ActivityEntry::new(user.clone(), kind, chapter, detail, self.clock.now());
        let _guard = self.write_lock.lock().await;
        let mut log = self.load().await;
        append_bounded(&mut log, entry.clone(), ACTIVITY_LOG_CAPACITY);
        self.store(&log).await;
        entry
    }

    /// Up to `limit` entries for `user`, newest first.
    pub async fn recent_for(&self, user: &UserId, limit: usize) -> Vec<ActivityEntry> {
        self.load()
            .await
            .into_iter()
            .rev()
            .filter(|entry| &entry.user_id == user)
            .take(limit)
            .collect()
    }

    /// Everything in the log, oldest first.
    pub async fn all(&self) -> Vec<ActivityEntry> {
        self.load().await
    }

    /// Drop every entry belonging to `user`. Returns how many were removed.
    pub async fn remove_user(&self, user: &UserId) -> usize {
        let _guard = self.write_lock.lock().await;
        let mut log = self.load().await;
        let before = log.len();
        log.retain(|entry| &entry.user_id != user);
        let removed = before - log.len();
        if removed > 0 {
            self.store(&log).await;
        }
        removed
    }

    async fn load(&self) -> Vec<ActivityEntry> {
        let shadowed = self.shadow().clone();
        if let Some(log) = shadowed {
            return log;
        }
        match load_json(self.kv.as_ref(), ACTIVITIES).await {
            Ok(log) => log.unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "activity log unreadable");
                Vec::new()
            }
        }
    }

    async fn store(&self, log: &[ActivityEntry]) {
        match save_json(self.kv.as_ref(), ACTIVITIES, &log).await {
            Ok(()) => *self.shadow() = None,
            Err(err) => {
                warn!(error = %err, entries = log.len(), "activity log kept in memory only");
                *self.shadow() = Some(log.to_vec());
            }
        }
    }

    fn shadow(&self) -> MutexGuard<'_, Option<Vec<ActivityEntry>>> {
        self.shadow.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
