//! Remote sync: the HTTP client, push retries, reconciliation of pulled
//! rows, and the periodic scheduler.

mod client;
mod reconcile;
mod retry;
mod scheduler;

pub use client::{ChapterEvent, PushOutcome, RemoteSync, SheetsClient};
pub use reconcile::{merge, MergeResult, ReconcileSummary, Reconciler};
pub use retry::{push_with_retry, PushReport, RetryPolicy};
pub use scheduler::{SyncRunOutcome, SyncScheduler, SyncState, SyncStatus};
