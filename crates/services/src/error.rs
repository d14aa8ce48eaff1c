//! Shared error types for the services crate.

use thiserror::Error;

use lms_core::model::{ChapterKey, IdError, RosterError};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by the remote sync client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error("remote sync is not configured")]
    Disabled,
    #[error("invalid sync configuration: {0}")]
    Config(String),
    #[error("remote request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("remote rejected the write: {0}")]
    Rejected(String),
    #[error("remote payload is malformed: {0}")]
    MalformedPayload(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl SyncError {
    /// Network, HTTP status, and payload failures: the remote could not be
    /// used right now and the operation may be retried later.
    #[must_use]
    pub fn is_remote_unavailable(&self) -> bool {
        matches!(
            self,
            SyncError::HttpStatus(_) | SyncError::MalformedPayload(_) | SyncError::Http(_)
        )
    }
}

/// Errors emitted by `ProgressService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("chapter {0} is not part of the curriculum")]
    UnknownChapter(ChapterKey),
    #[error(transparent)]
    Id(#[from] IdError),
}

/// Errors emitted by `AuthService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    #[error("user id and password are required")]
    MissingCredentials,
    #[error("invalid user id or password")]
    InvalidCredentials,
    #[error("no active session")]
    NotLoggedIn,
    #[error("administrator role required")]
    Forbidden,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping the application context.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppContextError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}
