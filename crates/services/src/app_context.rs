use std::sync::Arc;

use tracing::info;

use lms_core::model::{Curriculum, Roster};
use storage::repository::Storage;

use crate::activity_service::ActivityLog;
use crate::auth_service::AuthService;
use crate::config::SyncConfig;
use crate::error::AppContextError;
use crate::progress_service::ProgressService;
use crate::progress_store::LocalProgressStore;
use crate::sync::{Reconciler, RemoteSync, SheetsClient, SyncScheduler};
use crate::Clock;

/// Owns every service for one running session and the sync loop.
///
/// `start` begins syncing; `shutdown` cancels the interval.
pub struct AppContext {
    store: Arc<LocalProgressStore>,
    activity: Arc<ActivityLog>,
    auth: Arc<AuthService>,
    progress: Arc<ProgressService>,
    scheduler: Arc<SyncScheduler>,
}

impl AppContext {
    /// Build services backed by `SQLite` storage and the configured remote.
    ///
    /// # Errors
    ///
    /// Returns `AppContextError` if storage initialization fails or the sync
    /// configuration is invalid.
    pub async fn new_sqlite(
        db_url: &str,
        config: &SyncConfig,
        roster: Roster,
        clock: Clock,
    ) -> Result<Self, AppContextError> {
        let storage = Storage::sqlite(db_url).await?;
        let remote = remote_from_config(config)?;
        Ok(Self::assemble(storage, Curriculum::basic_course(), roster, remote, config, clock).await)
    }

    /// Build services over an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns `AppContextError::Sync` if the sync configuration is invalid.
    pub async fn in_memory(
        config: &SyncConfig,
        roster: Roster,
        clock: Clock,
    ) -> Result<Self, AppContextError> {
        let remote = remote_from_config(config)?;
        Ok(Self::assemble(
            Storage::in_memory(),
            Curriculum::basic_course(),
            roster,
            remote,
            config,
            clock,
        )
        .await)
    }

    /// Wire services over explicit parts. Intervals and retry settings come
    /// from `config`; its endpoints are ignored in favor of `remote`.
    pub async fn assemble(
        storage: Storage,
        catalog: Curriculum,
        roster: Roster,
        remote: Option<Arc<dyn RemoteSync>>,
        config: &SyncConfig,
        clock: Clock,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let roster = Arc::new(roster);
        let store = Arc::new(LocalProgressStore::new(
            Arc::clone(&storage.kv),
            catalog,
            clock,
        ));
        let activity = Arc::new(ActivityLog::new(Arc::clone(&storage.kv), clock));
        let auth = Arc::new(AuthService::new(
            Arc::clone(&storage.kv),
            Arc::clone(&roster),
            Arc::clone(&store),
            clock,
        ));
        let progress = Arc::new(ProgressService::new(
            Arc::clone(&store),
            Arc::clone(&activity),
            roster,
            remote.clone(),
            config.retry,
        ));
        let scheduler = Arc::new(
            SyncScheduler::load(
                remote,
                Reconciler::new(Arc::clone(&store), clock),
                Arc::clone(&storage.kv),
                clock,
                config.sync_interval,
            )
            .await,
        );

        Self {
            store,
            activity,
            auth,
            progress,
            scheduler,
        }
    }

    /// Align stored totals with the catalog, then start the sync loop (its
    /// first run is immediate).
    pub async fn start(&self) {
        let refreshed = self.store.refresh_totals().await;
        if refreshed > 0 {
            info!(refreshed, "updated chapter totals to the current catalog");
        }
        self.scheduler.start();
    }

    /// Stop the sync loop. Safe to call more than once.
    pub fn shutdown(&self) {
        self.scheduler.stop();
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressService> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn auth(&self) -> Arc<AuthService> {
        Arc::clone(&self.auth)
    }

    #[must_use]
    pub fn activity(&self) -> Arc<ActivityLog> {
        Arc::clone(&self.activity)
    }

    #[must_use]
    pub fn scheduler(&self) -> Arc<SyncScheduler> {
        Arc::clone(&self.scheduler)
    }

    #[must_use]
    pub fn store(&self) -> Arc<LocalProgressStore> {
        Arc::clone(&self.store)
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.scheduler.stop();
    }
}

fn remote_from_config(config: &SyncConfig) -> Result<Option<Arc<dyn RemoteSync>>, AppContextError> {
    if config.is_local_only() {
        return Ok(None);
    }
    let client: Arc<dyn RemoteSync> = Arc::new(SheetsClient::from_config(config)?);
    Ok(Some(client))
}
