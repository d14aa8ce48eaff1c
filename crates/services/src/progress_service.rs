use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lms_core::model::{
    ActivityKind, ChapterKey, Curriculum, LessonId, RemoteProgressRow, Roster, UserId, UserProgress,
};

use crate::activity_service::ActivityLog;
use crate::error::ProgressError;
use crate::progress_store::{LocalProgressStore, SaveStatus};
use crate::sync::{push_with_retry, ChapterEvent, PushReport, RemoteSync, RetryPolicy};

/// Result of marking a chapter complete.
#[derive(Debug)]
pub struct Completion {
    pub progress: UserProgress,
    /// `false` when the chapter was already complete; nothing was saved or
    /// pushed.
    pub newly_completed: bool,
    /// `None` when nothing needed saving.
    pub saved: Option<SaveStatus>,
    /// Background push of the event, when a write endpoint is configured.
    pub push: Option<JoinHandle<PushReport>>,
}

/// Where an overview came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverviewSource {
    Remote,
    Local,
}

/// Every known user's progress, highest completion rate first.
#[derive(Clone, Debug)]
pub struct ProgressOverview {
    pub source: OverviewSource,
    pub rows: Vec<RemoteProgressRow>,
}

/// Learner-facing progress operations with optional remote sync.
///
/// Local state is authoritative: completions are saved before any network
/// call and remote failures never reach the caller.
pub struct ProgressService {
    store: Arc<LocalProgressStore>,
    activity: Arc<ActivityLog>,
    roster: Arc<Roster>,
    remote: Option<Arc<dyn RemoteSync>>,
    retry: RetryPolicy,
}

impl ProgressService {
    #[must_use]
    pub fn new(
        store: Arc<LocalProgressStore>,
        activity: Arc<ActivityLog>,
        roster: Arc<Roster>,
        remote: Option<Arc<dyn RemoteSync>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            activity,
            roster,
            remote,
            retry,
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &Curriculum {
        self.store.catalog()
    }

    /// Current record for `user`.
    pub async fn progress(&self, user: &UserId) -> UserProgress {
        self.store.get(user).await
    }

    /// Mark a chapter complete, log the activity, and push the event in the
    /// background.
    ///
    /// The push retries per the configured policy. When it gives up, the
    /// failure is logged and recorded as a `sync_failed` activity.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::UnknownChapter` for keys outside the catalog.
    pub async fn complete_chapter(
        &self,
        user: &UserId,
        key: ChapterKey,
    ) -> Result<Completion, ProgressError> {
        if !self.catalog().contains(&key) {
            return Err(ProgressError::UnknownChapter(key));
        }

        let updated = self.store.complete_chapter(user, &key).await;
        let Some(completion) = updated.value else {
            debug!(user_id = %user, chapter = %key, "chapter already completed");
            return Ok(Completion {
                progress: updated.progress,
                newly_completed: false,
                saved: None,
                push: None,
            });
        };

        self.activity
            .record(
                user,
                ActivityKind::ChapterCompleted,
                Some(&key),
                completion.chapter_title.clone(),
            )
            .await;
        info!(
            user_id = %user,
            lesson_id = %key.lesson_id,
            chapter_id = %key.chapter_id,
            rate = updated.progress.completion_rate(),
            "chapter completed"
        );

        let push = self
            .remote
            .as_ref()
            .filter(|remote| remote.can_push())
            .map(|remote| {
                let event = ChapterEvent::new(&updated.progress, &completion);
                self.spawn_push(Arc::clone(remote), event)
            });

        Ok(Completion {
            progress: updated.progress,
            newly_completed: true,
            saved: updated.status,
            push,
        })
    }

    fn spawn_push(
        &self,
        remote: Arc<dyn RemoteSync>,
        event: ChapterEvent,
    ) -> JoinHandle<PushReport> {
        let activity = Arc::clone(&self.activity);
        let retry = self.retry;
        tokio::spawn(async move {
            let report = push_with_retry(remote.as_ref(), &event, retry).await;
            if let PushReport::Exhausted {
                attempts,
                last_error,
            } = &report
            {
                let key = ChapterKey::new(event.lesson_id.clone(), event.chapter_id.clone());
                activity
                    .record(
                        &event.user_id,
                        ActivityKind::SyncFailed,
                        Some(&key),
                        format!("unsynced after {attempts} attempts: {last_error}"),
                    )
                    .await;
            }
            report
        })
    }

    pub async fn is_completed(&self, user: &UserId, key: &ChapterKey) -> bool {
        self.store.is_chapter_completed(user, key).await
    }

    /// Percentage of `lesson` that `user` has completed; 0 for unknown
    /// lessons.
    pub async fn lesson_rate(&self, user: &UserId, lesson: &LessonId) -> u32 {
        let progress = self.store.get(user).await;
        self.catalog()
            .lesson_completion_rate(lesson, |key| progress.is_completed(key))
    }

    /// Overview from local records.
    pub async fn local_overview(&self) -> ProgressOverview {
        let rows = self
            .store
            .all_progress()
            .await
            .iter()
            .map(|progress| {
                RemoteProgressRow::from_progress(
                    progress,
                    Some(self.roster.display_name(progress.user_id())),
                )
            })
            .collect();
        ProgressOverview {
            source: OverviewSource::Local,
            rows,
        }
    }

    /// Overview from the remote sheet, sorted by its completion rate.
    ///
    /// Falls back to [`Self::local_overview`] when no read endpoint is
    /// configured or the pull fails.
    pub async fn remote_overview(&self) -> ProgressOverview {
        let Some(remote) = self.remote.as_ref().filter(|r| r.can_pull()) else {
            return self.local_overview().await;
        };
        match remote.pull().await {
            Ok(snapshot) => {
                let mut rows = snapshot.rows;
                rows.sort_by(|a, b| {
                    b.completion_rate
                        .unwrap_or(0)
                        .cmp(&a.completion_rate.unwrap_or(0))
                        .then_with(|| a.user_id.as_str().cmp(b.user_id.as_str()))
                });
                ProgressOverview {
                    source: OverviewSource::Remote,
                    rows,
                }
            }
            Err(err) => {
                warn!(error = %err, "remote overview unavailable, using local records");
                self.local_overview().await
            }
        }
    }

    /// Remove `user`'s progress and activity entries.
    pub async fn reset(&self, user: &UserId) -> SaveStatus {
        let status = self.store.reset(user).await;
        let removed = self.activity.remove_user(user).await;
        info!(user_id = %user, activities = removed, "progress reset");
        status
    }
}
