use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use lms_core::model::{
    append_bounded, LoginRecord, Roster, UserId, UserSession, LOGIN_HISTORY_CAPACITY,
};
use storage::keys::{CURRENT_SESSION, LOGIN_HISTORY};
use storage::repository::{load_json, save_json, KeyValueStore};

use crate::error::AuthError;
use crate::progress_store::LocalProgressStore;
use crate::Clock;

/// Login, logout, and the current-session record.
///
/// When the backend refuses a write, the session and login history are
/// kept in memory for the rest of the process and read from there.
pub struct AuthService {
    kv: Arc<dyn KeyValueStore>,
    roster: Arc<Roster>,
    progress: Arc<LocalProgressStore>,
    clock: Clock,
    shadow: Mutex<Shadow>,
}

#[derive(Default)]
struct Shadow {
    session: Option<UserSession>,
    history: Option<Vec<LoginRecord>>,
}

impl AuthService {
    #[must_use]
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        roster: Arc<Roster>,
        progress: Arc<LocalProgressStore>,
        clock: Clock,
    ) -> Self {
        Self {
            kv,
            roster,
            progress,
            clock,
            shadow: Mutex::new(Shadow::default()),
        }
    }

    #[must_use]
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Check credentials against the roster and open a session.
    ///
    /// Also appends to the login history and creates the user's progress
    /// record if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::MissingCredentials` for blank input and
    /// `AuthError::InvalidCredentials` for unknown users or wrong passwords.
    pub async fn login(&self, user_id: &str, password: &str) -> Result<UserSession, AuthError> {
        let user_id = user_id.trim();
        if user_id.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        let user = UserId::new(user_id).map_err(|_| AuthError::InvalidCredentials)?;
        let entry = self
            .roster
            .authenticate(&user, password)
            .ok_or(AuthError::InvalidCredentials)?;

        let session = UserSession::start(entry, self.clock.now());
        self.store_session(&session).await;

        let mut history = self.history().await;
        append_bounded(
            &mut history,
            LoginRecord::from_session(&session),
            LOGIN_HISTORY_CAPACITY,
        );
        self.store_history(&history).await;

        self.progress.ensure(&user).await;
        info!(user_id = %user, role = ?session.role, "logged in");
        Ok(session)
    }

    /// The open session, if any. Expired sessions are logged out.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the session record cannot be read.
    pub async fn current_session(&self) -> Result<Option<UserSession>, AuthError> {
        let Some(session) = self.open_session().await? else {
            return Ok(None);
        };
        if session.is_expired(self.clock.now()) {
            info!(user_id = %session.user_id, "session expired");
            self.close(&session).await?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Close the open session, stamping its logout time in the history.
    ///
    /// Returns the session that was closed, if there was one.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the session record cannot be removed.
    pub async fn logout(&self) -> Result<Option<UserSession>, AuthError> {
        let Some(session) = self.open_session().await? else {
            return Ok(None);
        };
        self.close(&session).await?;
        info!(user_id = %session.user_id, "logged out");
        Ok(Some(session))
    }

    /// Refresh `last_activity` on the open session.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotLoggedIn` without a live session, or
    /// `AuthError::Storage` if the session record cannot be read.
    pub async fn touch(&self) -> Result<UserSession, AuthError> {
        let mut session = self.current_session().await?.ok_or(AuthError::NotLoggedIn)?;
        session.last_activity = self.clock.now();
        self.store_session(&session).await;
        Ok(session)
    }

    /// Login history, newest first.
    pub async fn login_history(&self) -> Vec<LoginRecord> {
        let mut history = self.history().await;
        history.reverse();
        history
    }

    /// The open session, provided it belongs to an administrator.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotLoggedIn` or `AuthError::Forbidden`.
    pub async fn require_admin(&self) -> Result<UserSession, AuthError> {
        let session = self.current_session().await?.ok_or(AuthError::NotLoggedIn)?;
        if !session.is_admin() {
            return Err(AuthError::Forbidden);
        }
        Ok(session)
    }

    async fn close(&self, session: &UserSession) -> Result<(), AuthError> {
        let now = self.clock.now();
        let mut history = self.history().await;
        if let Some(record) = history
            .iter_mut()
            .rev()
            .find(|r| r.session_id == session.session_id && r.logout_time.is_none())
        {
            record.logout_time = Some(now);
            self.store_history(&history).await;
        }
        self.shadow().session = None;
        self.kv.remove(CURRENT_SESSION).await?;
        Ok(())
    }

    async fn open_session(&self) -> Result<Option<UserSession>, AuthError> {
        let shadowed = self.shadow().session.clone();
        if shadowed.is_some() {
            return Ok(shadowed);
        }
        Ok(load_json(self.kv.as_ref(), CURRENT_SESSION).await?)
    }

    async fn store_session(&self, session: &UserSession) {
        match save_json(self.kv.as_ref(), CURRENT_SESSION, session).await {
            Ok(()) => self.shadow().session = None,
            Err(err) => {
                warn!(user_id = %session.user_id, error = %err, "session kept in memory only");
                self.shadow().session = Some(session.clone());
            }
        }
    }

    async fn history(&self) -> Vec<LoginRecord> {
        let shadowed = self.shadow().history.clone();
        if let Some(history) = shadowed {
            return history;
        }
        match load_json(self.kv.as_ref(), LOGIN_HISTORY).await {
            Ok(history) => history.unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "login history unreadable");
                Vec::new()
            }
        }
    }

    async fn store_history(&self, history: &[LoginRecord]) {
        match save_json(self.kv.as_ref(), LOGIN_HISTORY, &history).await {
            Ok(()) => self.shadow().history = None,
            Err(err) => {
                warn!(error = %err, "login history kept in memory only");
                self.shadow().history = Some(history.to_vec());
            }
        }
    }

    fn shadow(&self) -> MutexGuard<'_, Shadow> {
        self.shadow.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
