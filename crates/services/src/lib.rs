#![forbid(unsafe_code)]

pub mod activity_service;
pub mod app_context;
pub mod auth_service;
pub mod config;
pub mod error;
pub mod progress_service;
pub mod progress_store;
pub mod sync;

pub use lms_core::Clock;

pub use activity_service::ActivityLog;
pub use app_context::AppContext;
pub use auth_service::AuthService;
pub use config::{SheetsReadConfig, SyncConfig, WriteResponseMode};
pub use error::{AppContextError, AuthError, ProgressError, SyncError};
pub use progress_service::{Completion, OverviewSource, ProgressOverview, ProgressService};
pub use progress_store::{LocalProgressStore, SaveStatus, Updated};
pub use sync::{
    ChapterEvent, PushOutcome, PushReport, ReconcileSummary, Reconciler, RemoteSync, RetryPolicy,
    SheetsClient, SyncRunOutcome, SyncScheduler, SyncStatus,
};
