use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::ids::{ChapterKey, UserId};

/// Most recent activity entries kept in the log.
pub const ACTIVITY_LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    ChapterCompleted,
    /// A completion that could not be pushed after every retry.
    SyncFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: Uuid,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub chapter: Option<String>,
    #[serde(default)]
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEntry {
    #[must_use]
    pub fn new(
        user_id: UserId,
        kind: ActivityKind,
        chapter: Option<&ChapterKey>,
        detail: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            chapter: chapter.map(ToString::to_string),
            detail: detail.into(),
            timestamp,
        }
    }
}

/// Push `entry` and drop the oldest entries beyond `capacity`.
pub fn append_bounded<T>(log: &mut Vec<T>, entry: T, capacity: usize) {
    log.push(entry);
    if log.len() > capacity {
        let excess = log.len() - capacity;
        log.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_bounded_keeps_most_recent() {
        let mut log: Vec<u32> = (0..5).collect();
        append_bounded(&mut log, 5, 3);
        assert_eq!(log, vec![3, 4, 5]);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let value = serde_json::to_value(ActivityKind::ChapterCompleted).unwrap();
        assert_eq!(value, "chapter_completed");
    }
}
