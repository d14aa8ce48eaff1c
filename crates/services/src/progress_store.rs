use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use lms_core::model::{ChapterCompletion, ChapterKey, Curriculum, UserId, UserProgress};
use storage::keys::{progress_key, user_from_progress_key, PROGRESS_PREFIX};
use storage::repository::{load_json, save_json, KeyValueStore};

use crate::Clock;

/// Where a save ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveStatus {
    /// Written to the backing store.
    Persisted,
    /// The backing store refused the write; the record lives in memory for
    /// the rest of this session.
    MemoryOnly,
}

impl SaveStatus {
    #[must_use]
    pub fn is_persisted(self) -> bool {
        self == SaveStatus::Persisted
    }
}

/// Result of a read-modify-write through [`LocalProgressStore::update`].
#[derive(Clone, Debug)]
pub struct Updated<R> {
    pub progress: UserProgress,
    pub value: R,
    /// `None` when the closure reported no change and nothing was saved.
    pub status: Option<SaveStatus>,
}

/// Per-user progress records over a key-value backend.
///
/// Persistence is best-effort. When the backend fails, records are kept in
/// an in-memory overlay so reads in the same session still see every save.
pub struct LocalProgressStore {
    kv: Arc<dyn KeyValueStore>,
    catalog: Arc<Curriculum>,
    clock: Clock,
    overlay: Mutex<HashMap<UserId, UserProgress>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl LocalProgressStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, catalog: Arc<Curriculum>, clock: Clock) -> Self {
        Self {
            kv,
            catalog,
            clock,
            overlay: Mutex::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &Curriculum {
        &self.catalog
    }

    /// Stored record for `user`, or a fresh one sized to the catalog.
    ///
    /// Unreadable records are logged and treated as missing.
    pub async fn get(&self, user: &UserId) -> UserProgress {
        let cached = self.overlay().get(user).cloned();
        if let Some(progress) = cached {
            return progress;
        }
        match load_json::<UserProgress>(self.kv.as_ref(), &progress_key(user)).await {
            Ok(Some(progress)) => progress,
            Ok(None) => self.fresh(user),
            Err(err) => {
                warn!(user_id = %user, error = %err, "progress record unreadable, starting fresh");
                self.fresh(user)
            }
        }
    }

    /// Stamp `progress` (last updated, completion rate) and write it.
    pub async fn save(&self, progress: &mut UserProgress) -> SaveStatus {
        let _guard = self.write_lock.lock().await;
        self.persist(progress).await
    }

    /// Serialized read-modify-write for one user.
    ///
    /// `apply` returns its result plus whether the record changed; unchanged
    /// records are not saved.
    pub async fn update<R: Send>(
        &self,
        user: &UserId,
        apply: impl FnOnce(&mut UserProgress) -> (R, bool) + Send,
    ) -> Updated<R> {
        let _guard = self.write_lock.lock().await;
        let mut progress = self.get(user).await;
        let (value, changed) = apply(&mut progress);
        let status = if changed {
            Some(self.persist(&mut progress).await)
        } else {
            None
        };
        Updated {
            progress,
            value,
            status,
        }
    }

    /// Create and persist a record for `user` if none exists yet.
    pub async fn ensure(&self, user: &UserId) -> UserProgress {
        let _guard = self.write_lock.lock().await;
        if self.overlay().contains_key(user) {
            return self.get(user).await;
        }
        match self.kv.get(&progress_key(user)).await {
            Ok(Some(_)) => self.get(user).await,
            Ok(None) => {
                let mut progress = self.fresh(user);
                self.persist(&mut progress).await;
                progress
            }
            Err(err) => {
                warn!(user_id = %user, error = %err, "progress store unavailable");
                self.get(user).await
            }
        }
    }

    /// Mark `key` complete for `user`.
    ///
    /// Returns the new completion, or `None` if it was already recorded.
    /// The title comes from the catalog.
    pub async fn complete_chapter(
        &self,
        user: &UserId,
        key: &ChapterKey,
    ) -> Updated<Option<ChapterCompletion>> {
        let completion =
            ChapterCompletion::new(key.clone(), self.catalog.chapter_title(key), self.clock.now());
        self.update(user, move |progress| {
            if progress.record_completion(completion.clone()) {
                (Some(completion), true)
            } else {
                (None, false)
            }
        })
        .await
    }

    pub async fn is_chapter_completed(&self, user: &UserId, key: &ChapterKey) -> bool {
        self.get(user).await.is_completed(key)
    }

    /// Every known user's record, highest completion rate first.
    pub async fn all_progress(&self) -> Vec<UserProgress> {
        let mut users: Vec<UserId> = match self.kv.keys_with_prefix(PROGRESS_PREFIX).await {
            Ok(keys) => keys
                .iter()
                .filter_map(|key| user_from_progress_key(key))
                .collect(),
            Err(err) => {
                warn!(error = %err, "progress listing unavailable");
                Vec::new()
            }
        };
        let shadowed: Vec<UserId> = self.overlay().keys().cloned().collect();
        for user in shadowed {
            if !users.contains(&user) {
                users.push(user);
            }
        }

        let mut records = Vec::with_capacity(users.len());
        for user in &users {
            records.push(self.get(user).await);
        }
        records.sort_by(|a, b| {
            b.completion_rate()
                .cmp(&a.completion_rate())
                .then_with(|| a.user_id().as_str().cmp(b.user_id().as_str()))
        });
        records
    }

    /// Rewrite `total_chapters` on stored records that disagree with the
    /// catalog. Returns how many records changed.
    pub async fn refresh_totals(&self) -> usize {
        let total = self.catalog.total_chapters();
        let mut refreshed = 0;
        for record in self.all_progress().await {
            if record.total_chapters() == total {
                continue;
            }
            let user = record.user_id().clone();
            let updated = self
                .update(&user, |progress| {
                    let changed = progress.total_chapters() != total;
                    progress.set_total_chapters(total);
                    ((), changed)
                })
                .await;
            if updated.status.is_some() {
                refreshed += 1;
            }
        }
        if refreshed > 0 {
            debug!(refreshed, total, "refreshed chapter totals");
        }
        refreshed
    }

    /// Drop the record for `user`.
    ///
    /// If the backend cannot delete, a fresh record shadows the stored one
    /// for the rest of the session.
    pub async fn reset(&self, user: &UserId) -> SaveStatus {
        let _guard = self.write_lock.lock().await;
        match self.kv.remove(&progress_key(user)).await {
            Ok(()) => {
                self.overlay().remove(user);
                SaveStatus::Persisted
            }
            Err(err) => {
                warn!(user_id = %user, error = %err, "progress reset kept in memory only");
                let fresh = self.fresh(user);
                self.overlay().insert(user.clone(), fresh);
                SaveStatus::MemoryOnly
            }
        }
    }

    async fn persist(&self, progress: &mut UserProgress) -> SaveStatus {
        progress.stamp(self.clock.now());
        let user = progress.user_id().clone();
        match save_json(self.kv.as_ref(), &progress_key(&user), progress).await {
            Ok(()) => {
                self.overlay().remove(&user);
                SaveStatus::Persisted
            }
            Err(err) => {
                warn!(user_id = %user, error = %err, "progress kept in memory only");
                self.overlay().insert(user, progress.clone());
                SaveStatus::MemoryOnly
            }
        }
    }

    fn fresh(&self, user: &UserId) -> UserProgress {
        UserProgress::new(user.clone(), self.catalog.total_chapters(), self.clock.now())
    }

    fn overlay(&self) -> MutexGuard<'_, HashMap<UserId, UserProgress>> {
        self.overlay.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use lms_core::time::fixed_clock;
    use storage::repository::InMemoryStore;

    fn user(raw: &str) -> UserId {
        UserId::new(raw).unwrap()
    }

    fn key(raw: &str) -> ChapterKey {
        raw.parse().unwrap()
    }

    fn store_with(kv: InMemoryStore) -> LocalProgressStore {
        LocalProgressStore::new(
            Arc::new(kv),
            Arc::new(Curriculum::basic_course()),
            fixed_clock(),
        )
    }

    #[tokio::test]
    async fn get_returns_default_sized_to_catalog() {
        let store = store_with(InMemoryStore::new());
        let progress = store.get(&user("user001")).await;
        assert!(progress.completed_chapters().is_empty());
        assert_eq!(progress.completion_rate(), 0);
        assert_eq!(progress.total_chapters(), store.catalog().total_chapters());
    }

    #[tokio::test]
    async fn save_then_get_sees_recomputed_rate() {
        let store = store_with(InMemoryStore::new());
        let mut progress = UserProgress::new(user("user001"), 27, lms_core::time::fixed_now());
        progress.record_completion(ChapterCompletion::new(
            key("lesson1_chapter1"),
            "",
            lms_core::time::fixed_now(),
        ));
        assert_eq!(store.save(&mut progress).await, SaveStatus::Persisted);

        let back = store.get(&user("user001")).await;
        assert_eq!(back.completion_rate(), 4);
        assert_eq!(back, progress);
    }

    #[tokio::test]
    async fn completing_twice_keeps_one_entry() {
        let store = store_with(InMemoryStore::new());
        let u = user("user001");
        let first = store.complete_chapter(&u, &key("lesson1_chapter1")).await;
        assert!(first.value.is_some());
        let second = store.complete_chapter(&u, &key("lesson1_chapter1")).await;
        assert!(second.value.is_none());
        assert!(second.status.is_none());

        let progress = store.get(&u).await;
        assert_eq!(progress.completed_count(), 1);
        assert!(store.is_chapter_completed(&u, &key("lesson1_chapter1")).await);
        assert!(!progress.completed_chapters()[0].chapter_title.is_empty());
    }

    #[tokio::test]
    async fn quota_failure_degrades_to_memory() {
        let store = store_with(InMemoryStore::with_quota(16));
        let u = user("user001");
        let updated = store.complete_chapter(&u, &key("lesson1_chapter1")).await;
        assert_eq!(updated.status, Some(SaveStatus::MemoryOnly));

        // still visible within the session
        assert!(store.is_chapter_completed(&u, &key("lesson1_chapter1")).await);
        assert_eq!(store.all_progress().await.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_record_reads_as_fresh() {
        let kv = InMemoryStore::new();
        kv.put("userProgress_user001", "{oops").await.unwrap();
        let store = store_with(kv);
        let progress = store.get(&user("user001")).await;
        assert_eq!(progress.completed_count(), 0);
    }

    #[tokio::test]
    async fn all_progress_sorts_by_rate_descending() {
        let store = store_with(InMemoryStore::new());
        store.ensure(&user("user001")).await;
        store
            .complete_chapter(&user("user002"), &key("lesson1_chapter1"))
            .await;
        store
            .complete_chapter(&user("user003"), &key("lesson1_chapter1"))
            .await;
        store
            .complete_chapter(&user("user003"), &key("lesson1_chapter2"))
            .await;

        let ids: Vec<String> = store
            .all_progress()
            .await
            .iter()
            .map(|p| p.user_id().to_string())
            .collect();
        assert_eq!(ids, vec!["user003", "user002", "user001"]);
    }

    #[tokio::test]
    async fn refresh_totals_rewrites_stale_records() {
        let store = store_with(InMemoryStore::new());
        let mut stale = UserProgress::new(user("user001"), 5, lms_core::time::fixed_now());
        store.save(&mut stale).await;

        assert_eq!(store.refresh_totals().await, 1);
        assert_eq!(store.refresh_totals().await, 0);
        let progress = store.get(&user("user001")).await;
        assert_eq!(progress.total_chapters(), store.catalog().total_chapters());
    }

    #[tokio::test]
    async fn reset_removes_record() {
        let store = store_with(InMemoryStore::new());
        let u = user("user001");
        store.complete_chapter(&u, &key("lesson1_chapter1")).await;
        assert_eq!(store.reset(&u).await, SaveStatus::Persisted);
        assert_eq!(store.get(&u).await.completed_count(), 0);
        assert!(store.all_progress().await.is_empty());
    }
}
