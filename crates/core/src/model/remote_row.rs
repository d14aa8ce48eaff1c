//! Codec for the one-row-per-user sheet layout.
//!
//! Columns, in order:
//!
//! | A      | B        | C             | D                 | E              | F           | G                     |
//! |--------|----------|---------------|-------------------|----------------|-------------|-----------------------|
//! | userId | userName | totalChapters | completedChapters | completionRate | lastUpdated | completedChaptersList |
//!
//! `completedChaptersList` is a `,`-separated list of `lessonId_chapterId`
//! tokens. The sheet API drops trailing empty cells, so short rows are
//! padded with empty values rather than rejected.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::ids::{ChapterKey, IdError, UserId};
use crate::model::progress::UserProgress;
use crate::time::parse_timestamp;

pub const COLUMN_COUNT: usize = 7;
pub const LIST_SEPARATOR: char = ',';

pub const HEADERS: [&str; COLUMN_COUNT] = [
    "userId",
    "userName",
    "totalChapters",
    "completedChapters",
    "completionRate",
    "lastUpdated",
    "completedChaptersList",
];

/// Why a sheet row could not be used.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RowError {
    #[error("row has no user id")]
    MissingUserId,

    #[error("row has an invalid user id: {0}")]
    InvalidUserId(#[from] IdError),
}

/// Decoded sheet row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteProgressRow {
    pub user_id: UserId,
    pub user_name: Option<String>,
    pub total_chapters: Option<u32>,
    pub completed_count: Option<u32>,
    pub completion_rate: Option<u32>,
    pub last_updated: Option<DateTime<Utc>>,
    pub chapters: Vec<ChapterKey>,
    /// Tokens in the chapter list that did not decode.
    pub skipped_tokens: usize,
}

impl RemoteProgressRow {
    /// Decode a row of cells.
    ///
    /// Numeric and timestamp cells that fail to parse become `None`;
    /// malformed chapter tokens are skipped and counted.
    ///
    /// # Errors
    ///
    /// Returns `RowError` when the user id cell is blank or invalid.
    pub fn parse<S: AsRef<str>>(cells: &[S]) -> Result<Self, RowError> {
        let cell = |idx: usize| cells.get(idx).map_or("", |c| c.as_ref().trim());

        let raw_user = cell(0);
        if raw_user.is_empty() {
            return Err(RowError::MissingUserId);
        }
        let user_id = UserId::new(raw_user)?;
        let user_name = Some(cell(1)).filter(|s| !s.is_empty()).map(str::to_string);
        let (chapters, skipped_tokens) = decode_chapter_list(cell(6));

        Ok(Self {
            user_id,
            user_name,
            total_chapters: parse_count(cell(2)),
            completed_count: parse_count(cell(3)),
            completion_rate: parse_count(cell(4)),
            last_updated: parse_timestamp(cell(5)),
            chapters,
            skipped_tokens,
        })
    }

    /// Snapshot a local record in sheet form.
    #[must_use]
    pub fn from_progress(progress: &UserProgress, user_name: Option<String>) -> Self {
        Self {
            user_id: progress.user_id().clone(),
            user_name,
            total_chapters: Some(progress.total_chapters()),
            completed_count: Some(progress.completed_count()),
            completion_rate: Some(progress.completion_rate()),
            last_updated: Some(progress.last_updated()),
            chapters: progress.completed_keys(),
            skipped_tokens: 0,
        }
    }

    /// Encode back to cells in column order.
    #[must_use]
    pub fn to_cells(&self) -> Vec<String> {
        let num = |v: Option<u32>| v.map(|n| n.to_string()).unwrap_or_default();
        vec![
            self.user_id.to_string(),
            self.user_name.clone().unwrap_or_default(),
            num(self.total_chapters),
            num(self.completed_count),
            num(self.completion_rate),
            self.last_updated.map(|t| t.to_rfc3339()).unwrap_or_default(),
            encode_chapter_list(&self.chapters),
        ]
    }
}

/// Split a chapter list into keys, skipping blanks and counting bad tokens.
///
/// Repeated keys are collapsed, keeping the first occurrence.
#[must_use]
pub fn decode_chapter_list(raw: &str) -> (Vec<ChapterKey>, usize) {
    let mut keys: Vec<ChapterKey> = Vec::new();
    let mut skipped = 0;
    for token in raw.split(LIST_SEPARATOR).map(str::trim) {
        if token.is_empty() {
            continue;
        }
        match token.parse::<ChapterKey>() {
            Ok(key) if !keys.contains(&key) => keys.push(key),
            Ok(_) => {}
            Err(_) => skipped += 1,
        }
    }
    (keys, skipped)
}

#[must_use]
pub fn encode_chapter_list(keys: &[ChapterKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(&LIST_SEPARATOR.to_string())
}

/// Lenient count parser: accepts `27`, ` 27 `, `4%`, `4.0`.
///
/// Anything negative, non-finite, or non-numeric is `None`.
#[must_use]
pub fn parse_count(raw: &str) -> Option<u32> {
    let trimmed = raw.trim().trim_end_matches('%').trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(n) = trimmed.parse::<u32>() {
        return Some(n);
    }
    let value = trimmed.parse::<f64>().ok()?;
    if !value.is_finite() || value < 0.0 || value > f64::from(u32::MAX) {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some(value.round() as u32)
}

/// Result of decoding a whole value range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetSnapshot {
    pub rows: Vec<RemoteProgressRow>,
    /// `(row index in the range, reason)` for rows that were skipped.
    pub malformed: Vec<(usize, RowError)>,
}

impl SheetSnapshot {
    /// Decode a value range whose first row is the header.
    ///
    /// Fewer than two rows means "no data" and yields an empty snapshot.
    #[must_use]
    pub fn from_values<S: AsRef<str>>(values: &[Vec<S>]) -> Self {
        let mut snapshot = Self::default();
        if values.len() < 2 {
            return snapshot;
        }
        for (idx, cells) in values.iter().enumerate().skip(1) {
            match RemoteProgressRow::parse(cells) {
                Ok(row) => snapshot.rows.push(row),
                Err(err) => snapshot.malformed.push((idx, err)),
            }
        }
        snapshot
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
