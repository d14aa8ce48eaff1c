use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when an identifier fails validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdError {
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    #[error("{kind} contains invalid character {ch:?}")]
    InvalidChar { kind: &'static str, ch: char },

    #[error("chapter key {raw:?} is not of the form lessonId_chapterId")]
    InvalidChapterKey { raw: String },
}

fn validate(kind: &'static str, raw: &str, allow_underscore: bool) -> Result<(), IdError> {
    if raw.is_empty() {
        return Err(IdError::Empty { kind });
    }
    let bad = raw
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || (allow_underscore && *c == '_')));
    match bad {
        Some(ch) => Err(IdError::InvalidChar { kind, ch }),
        None => Ok(()),
    }
}

/// Unique identifier for a learner (`user001`, `admin`, ...).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Creates a new `UserId`.
    ///
    /// # Errors
    ///
    /// Returns `IdError` if the id is empty or contains characters outside
    /// `[A-Za-z0-9_-]`.
    pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        validate("UserId", &raw, true)?;
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifier of a lesson within the curriculum.
///
/// Underscores are rejected because `_` separates lesson and chapter in
/// encoded chapter lists.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LessonId(String);

impl LessonId {
    /// Creates a new `LessonId`.
    ///
    /// # Errors
    ///
    /// Returns `IdError` if the id is empty or contains characters outside
    /// `[A-Za-z0-9-]`.
    pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        validate("LessonId", &raw, false)?;
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifier of a chapter, unique only within its lesson.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChapterId(String);

impl ChapterId {
    /// Creates a new `ChapterId`.
    ///
    /// # Errors
    ///
    /// Returns `IdError` if the id is empty or contains characters outside
    /// `[A-Za-z0-9-]`.
    pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        validate("ChapterId", &raw, false)?;
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Composite `(lesson, chapter)` key identifying one completable unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChapterKey {
    pub lesson_id: LessonId,
    pub chapter_id: ChapterId,
}

impl ChapterKey {
    #[must_use]
    pub fn new(lesson_id: LessonId, chapter_id: ChapterId) -> Self {
        Self {
            lesson_id,
            chapter_id,
        }
    }
}

// ─── Conversions ───────────────────────────────────────────────────────────────

impl TryFrom<String> for UserId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for LessonId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for ChapterId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl From<LessonId> for String {
    fn from(value: LessonId) -> Self {
        value.0
    }
}

impl From<ChapterId> for String {
    fn from(value: ChapterId) -> Self {
        value.0
    }
}

// ─── Debug / Display Implementations ───────────────────────────────────────────

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Debug for LessonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LessonId({})", self.0)
    }
}

impl fmt::Debug for ChapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChapterId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for LessonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ChapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Renders the key as the `lessonId_chapterId` token used in remote rows.
impl fmt::Display for ChapterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.lesson_id, self.chapter_id)
    }
}

// ─── FromStr Implementations ───────────────────────────────────────────────────

impl FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl FromStr for LessonId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl FromStr for ChapterId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl FromStr for ChapterKey {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IdError::InvalidChapterKey { raw: s.to_string() };
        let mut parts = s.split('_');
        let (Some(lesson), Some(chapter), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let lesson_id = LessonId::new(lesson).map_err(|_| invalid())?;
        let chapter_id = ChapterId::new(chapter).map_err(|_| invalid())?;
        Ok(Self::new(lesson_id, chapter_id))
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_accepts_roster_style_ids() {
        assert_eq!(UserId::new("user001").unwrap().as_str(), "user001");
        assert!(UserId::new("demo_456").is_ok());
    }

    #[test]
    fn user_id_rejects_empty_and_spaces() {
        assert_eq!(
            UserId::new("").unwrap_err(),
            IdError::Empty { kind: "UserId" }
        );
        assert!(matches!(
            UserId::new("user 1"),
            Err(IdError::InvalidChar { ch: ' ', .. })
        ));
    }

    #[test]
    fn lesson_id_rejects_underscore() {
        assert!(LessonId::new("lesson_1").is_err());
        assert!(ChapterId::new("chapter_1").is_err());
    }

    #[test]
    fn chapter_key_parses_token() {
        let key: ChapterKey = "lesson1_chapter3".parse().unwrap();
        assert_eq!(key.lesson_id.as_str(), "lesson1");
        assert_eq!(key.chapter_id.as_str(), "chapter3");
        assert_eq!(key.to_string(), "lesson1_chapter3");
    }

    #[test]
    fn chapter_key_rejects_wrong_arity() {
        assert!("lesson1".parse::<ChapterKey>().is_err());
        assert!("lesson1_chapter1_extra".parse::<ChapterKey>().is_err());
        assert!("_chapter1".parse::<ChapterKey>().is_err());
    }

    #[test]
    fn ids_deserialize_with_validation() {
        let ok: UserId = serde_json::from_str("\"user002\"").unwrap();
        assert_eq!(ok.to_string(), "user002");
        assert!(serde_json::from_str::<UserId>("\"\"").is_err());
    }
}
