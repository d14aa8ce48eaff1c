use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use lms_core::model::{
    ChapterCompletion, Curriculum, RemoteProgressRow, SheetSnapshot, UserProgress,
};

use crate::progress_store::{LocalProgressStore, SaveStatus};
use crate::Clock;

/// Outcome of merging one remote row into one local record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeResult {
    pub progress: UserProgress,
    /// Completions taken from the row.
    pub added: usize,
    /// Row chapters that the catalog does not know; ignored.
    pub unknown: usize,
    /// Whether `progress` differs from the input beyond timestamps.
    pub changed: bool,
}

/// Additive merge of `row` into `local`.
///
/// Local completions win: a chapter already present keeps its title and
/// timestamp. New ones take the catalog title and the row's last-updated
/// time (or `now`). `total_chapters` follows the row when it holds a usable
/// number, otherwise the catalog. The completion rate is left for the store
/// to recompute on save.
#[must_use]
pub fn merge(
    local: &UserProgress,
    row: &RemoteProgressRow,
    catalog: &Curriculum,
    now: DateTime<Utc>,
) -> MergeResult {
    let mut progress = local.clone();
    progress.dedupe();

    let completed_at = row.last_updated.unwrap_or(now);
    let mut added = 0;
    let mut unknown = 0;
    for key in &row.chapters {
        if !catalog.contains(key) {
            unknown += 1;
            continue;
        }
        let completion =
            ChapterCompletion::new(key.clone(), catalog.chapter_title(key), completed_at);
        if progress.record_completion(completion) {
            added += 1;
        }
    }

    let total = row
        .total_chapters
        .filter(|total| *total > 0 && *total >= progress.completed_count())
        .unwrap_or_else(|| catalog.total_chapters());
    progress.set_total_chapters(total);

    let changed = !progress.same_content(local);
    MergeResult {
        progress,
        added,
        unknown,
        changed,
    }
}

/// Counters for one reconciliation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub users_seen: usize,
    pub users_updated: usize,
    pub chapters_added: usize,
    pub unknown_chapters: usize,
    pub malformed_rows: usize,
    pub skipped_tokens: usize,
    /// Updated records that could only be kept in memory.
    pub memory_only: usize,
}

/// Applies pulled snapshots to the local store.
pub struct Reconciler {
    store: Arc<LocalProgressStore>,
    clock: Clock,
}

impl Reconciler {
    #[must_use]
    pub fn new(store: Arc<LocalProgressStore>, clock: Clock) -> Self {
        Self { store, clock }
    }

    /// Merge every decodable row. Malformed rows are counted and skipped;
    /// unchanged records are not rewritten.
    pub async fn apply(&self, snapshot: &SheetSnapshot) -> ReconcileSummary {
        let mut summary = ReconcileSummary {
            malformed_rows: snapshot.malformed.len(),
            ..ReconcileSummary::default()
        };
        for (index, reason) in &snapshot.malformed {
            warn!(row = index, error = %reason, "skipping malformed remote row");
        }

        let now = self.clock.now();
        let catalog = self.store.catalog();
        for row in &snapshot.rows {
            summary.users_seen += 1;
            summary.skipped_tokens += row.skipped_tokens;

            let updated = self
                .store
                .update(&row.user_id, |progress| {
                    let merged = merge(progress, row, catalog, now);
                    let counts = (merged.added, merged.unknown);
                    *progress = merged.progress;
                    (counts, merged.changed)
                })
                .await;

            let (added, unknown) = updated.value;
            summary.chapters_added += added;
            summary.unknown_chapters += unknown;
            match updated.status {
                Some(SaveStatus::Persisted) => summary.users_updated += 1,
                Some(SaveStatus::MemoryOnly) => {
                    summary.users_updated += 1;
                    summary.memory_only += 1;
                }
                None => {}
            }
            if added > 0 {
                debug!(user_id = %row.user_id, added, "merged remote completions");
            }
        }
        summary
    }
}
