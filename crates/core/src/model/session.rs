use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::ids::UserId;

/// Sessions older than this are treated as logged out.
pub const SESSION_TTL_HOURS: i64 = 24;

/// Most recent login history entries kept.
pub const LOGIN_HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RosterError {
    #[error("roster is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate roster entry for {0}")]
    Duplicate(UserId),

    #[error("roster is empty")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// One account in the externally supplied roster.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RosterEntry {
    pub user_id: UserId,
    pub name: String,
    #[serde(default = "default_role")]
    pub role: Role,
    pub password: String,
}

fn default_role() -> Role {
    Role::User
}

/// Known accounts.
///
/// Credentials are plain configuration data, loaded at startup from outside
/// the shipped binary. This is not an authentication boundary.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: HashMap<UserId, RosterEntry>,
}

impl Roster {
    /// Build a roster from entries.
    ///
    /// # Errors
    ///
    /// Returns `RosterError::Duplicate` when a user id repeats.
    pub fn from_entries(entries: Vec<RosterEntry>) -> Result<Self, RosterError> {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            if map.contains_key(&entry.user_id) {
                return Err(RosterError::Duplicate(entry.user_id));
            }
            map.insert(entry.user_id.clone(), entry);
        }
        Ok(Self { entries: map })
    }

    /// Parse a JSON array of roster entries.
    ///
    /// # Errors
    ///
    /// Returns `RosterError` for malformed JSON, duplicates, or an empty list.
    pub fn from_json(raw: &str) -> Result<Self, RosterError> {
        let entries: Vec<RosterEntry> = serde_json::from_str(raw)?;
        if entries.is_empty() {
            return Err(RosterError::Empty);
        }
        Self::from_entries(entries)
    }

    #[must_use]
    pub fn get(&self, user_id: &UserId) -> Option<&RosterEntry> {
        self.entries.get(user_id)
    }

    /// Entry for `user_id` if `password` matches.
    #[must_use]
    pub fn authenticate(&self, user_id: &UserId, password: &str) -> Option<&RosterEntry> {
        self.entries
            .get(user_id)
            .filter(|entry| entry.password == password)
    }

    /// Display name, falling back to the id itself.
    #[must_use]
    pub fn display_name(&self, user_id: &UserId) -> String {
        self.entries
            .get(user_id)
            .map_or_else(|| user_id.to_string(), |e| e.name.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The currently logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSession {
    pub session_id: Uuid,
    pub user_id: UserId,
    pub name: String,
    pub role: Role,
    pub login_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl UserSession {
    #[must_use]
    pub fn start(entry: &RosterEntry, now: DateTime<Utc>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id: entry.user_id.clone(),
            name: entry.name.clone(),
            role: entry.role,
            login_time: now,
            last_activity: now,
        }
    }

    /// Expiry is measured from login, not from last activity.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.login_time > Duration::hours(SESSION_TTL_HOURS)
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRecord {
    pub session_id: Uuid,
    pub user_id: UserId,
    pub name: String,
    pub role: Role,
    pub login_time: DateTime<Utc>,
    pub logout_time: Option<DateTime<Utc>>,
}

impl LoginRecord {
    #[must_use]
    pub fn from_session(session: &UserSession) -> Self {
        Self {
            session_id: session.session_id,
            user_id: session.user_id.clone(),
            name: session.name.clone(),
            role: session.role,
            login_time: session.login_time,
            logout_time: None,
        }
    }
}
