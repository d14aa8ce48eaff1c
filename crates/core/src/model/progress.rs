use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{ChapterId, ChapterKey, LessonId, UserId};

/// `round(100 × completed / total)`, or 0 when the curriculum is empty.
///
/// Rounds half up, matching the rate shown to learners.
#[must_use]
pub fn completion_rate(completed: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let completed = u64::from(completed);
    let total = u64::from(total);
    let rate = (200 * completed + total) / (2 * total);
    u32::try_from(rate).unwrap_or(u32::MAX)
}

/// A single completed chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterCompletion {
    pub lesson_id: LessonId,
    pub chapter_id: ChapterId,
    #[serde(default)]
    pub chapter_title: String,
    pub completed_at: DateTime<Utc>,
}

impl ChapterCompletion {
    #[must_use]
    pub fn new(
        key: ChapterKey,
        chapter_title: impl Into<String>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            lesson_id: key.lesson_id,
            chapter_id: key.chapter_id,
            chapter_title: chapter_title.into(),
            completed_at,
        }
    }

    #[must_use]
    pub fn key(&self) -> ChapterKey {
        ChapterKey::new(self.lesson_id.clone(), self.chapter_id.clone())
    }

    fn matches(&self, key: &ChapterKey) -> bool {
        self.lesson_id == key.lesson_id && self.chapter_id == key.chapter_id
    }
}

/// Per-user completion record.
///
/// Holds at most one completion per `(lesson, chapter)`. `completion_rate`
/// is derived; call [`UserProgress::stamp`] after mutating so it reflects
/// the completed count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    user_id: UserId,
    completed_chapters: Vec<ChapterCompletion>,
    last_updated: DateTime<Utc>,
    total_chapters: u32,
    completion_rate: u32,
}

impl UserProgress {
    /// Fresh record with no completions.
    #[must_use]
    pub fn new(user_id: UserId, total_chapters: u32, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            completed_chapters: Vec::new(),
            last_updated: now,
            total_chapters,
            completion_rate: 0,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[must_use]
    pub fn completed_chapters(&self) -> &[ChapterCompletion] {
        &self.completed_chapters
    }

    #[must_use]
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    #[must_use]
    pub fn total_chapters(&self) -> u32 {
        self.total_chapters
    }

    #[must_use]
    pub fn completion_rate(&self) -> u32 {
        self.completion_rate
    }

    #[must_use]
    pub fn completed_count(&self) -> u32 {
        u32::try_from(self.completed_chapters.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn is_completed(&self, key: &ChapterKey) -> bool {
        self.completed_chapters.iter().any(|c| c.matches(key))
    }

    #[must_use]
    pub fn completed_keys(&self) -> Vec<ChapterKey> {
        self.completed_chapters.iter().map(ChapterCompletion::key).collect()
    }

    /// Append a completion unless its key is already present.
    ///
    /// Returns `false` (and leaves the record untouched) for duplicates.
    pub fn record_completion(&mut self, completion: ChapterCompletion) -> bool {
        if self.is_completed(&completion.key()) {
            return false;
        }
        self.completed_chapters.push(completion);
        true
    }

    /// Drop repeated `(lesson, chapter)` entries, keeping the first seen.
    ///
    /// Returns the number of entries removed.
    pub fn dedupe(&mut self) -> usize {
        let before = self.completed_chapters.len();
        let mut seen = HashSet::new();
        self.completed_chapters.retain(|c| seen.insert(c.key()));
        before - self.completed_chapters.len()
    }

    pub fn set_total_chapters(&mut self, total: u32) {
        self.total_chapters = total;
    }

    /// Update `last_updated` and recompute `completion_rate`.
    pub fn stamp(&mut self, now: DateTime<Utc>) {
        self.last_updated = now;
        self.completion_rate = completion_rate(self.completed_count(), self.total_chapters);
    }

    /// True when both records hold the same completions and totals,
    /// ignoring timestamps.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.user_id == other.user_id
            && self.total_chapters == other.total_chapters
            && self.completed_keys() == other.completed_keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn key(raw: &str) -> ChapterKey {
        raw.parse().unwrap()
    }

    fn user() -> UserId {
        UserId::new("user001").unwrap()
    }

    #[test]
    fn rate_rounds_half_up() {
        assert_eq!(completion_rate(1, 27), 4);
        assert_eq!(completion_rate(1, 8), 13);
        assert_eq!(completion_rate(0, 27), 0);
        assert_eq!(completion_rate(27, 27), 100);
        assert_eq!(completion_rate(3, 0), 0);
    }

    #[test]
    fn duplicate_completion_is_rejected() {
        let mut progress = UserProgress::new(user(), 27, fixed_now());
        assert!(progress.record_completion(ChapterCompletion::new(
            key("lesson1_chapter1"),
            "Intro",
            fixed_now()
        )));
        assert!(!progress.record_completion(ChapterCompletion::new(
            key("lesson1_chapter1"),
            "Other title",
            fixed_now()
        )));
        assert_eq!(progress.completed_count(), 1);
        assert_eq!(progress.completed_chapters()[0].chapter_title, "Intro");
    }

    #[test]
    fn stamp_recomputes_rate() {
        let mut progress = UserProgress::new(user(), 27, fixed_now());
        progress.record_completion(ChapterCompletion::new(
            key("lesson1_chapter1"),
            "",
            fixed_now(),
        ));
        assert_eq!(progress.completion_rate(), 0);
        progress.stamp(fixed_now());
        assert_eq!(progress.completion_rate(), 4);
    }

    #[test]
    fn dedupe_keeps_first_seen() {
        let json = serde_json::json!({
            "userId": "user001",
            "completedChapters": [
                {"lessonId": "lesson1", "chapterId": "chapter1", "chapterTitle": "first", "completedAt": "2024-01-01T00:00:00Z"},
                {"lessonId": "lesson1", "chapterId": "chapter1", "chapterTitle": "second", "completedAt": "2024-01-02T00:00:00Z"}
            ],
            "lastUpdated": "2024-01-02T00:00:00Z",
            "totalChapters": 27,
            "completionRate": 7
        });
        let mut progress: UserProgress = serde_json::from_value(json).unwrap();
        assert_eq!(progress.dedupe(), 1);
        assert_eq!(progress.completed_chapters()[0].chapter_title, "first");
    }

    #[test]
    fn serializes_camel_case() {
        let progress = UserProgress::new(user(), 27, fixed_now());
        let value = serde_json::to_value(&progress).unwrap();
        assert_eq!(value["userId"], "user001");
        assert_eq!(value["totalChapters"], 27);
        assert!(value["completedChapters"].as_array().unwrap().is_empty());
    }
}
