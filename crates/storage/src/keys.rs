//! Logical key namespace shared by every backend.

use lms_core::model::UserId;

/// Record of the currently logged-in user.
pub const CURRENT_SESSION: &str = "currentUser";

/// Prefix for per-user progress records.
pub const PROGRESS_PREFIX: &str = "userProgress_";

/// Bounded activity log.
pub const ACTIVITIES: &str = "userActivities";

/// Bounded login history.
pub const LOGIN_HISTORY: &str = "loginHistory";

/// Timestamp of the last completed pull.
pub const LAST_SYNC: &str = "lastSyncTime";

#[must_use]
pub fn progress_key(user_id: &UserId) -> String {
    format!("{PROGRESS_PREFIX}{user_id}")
}

/// Inverse of [`progress_key`]; `None` for keys outside the namespace.
#[must_use]
pub fn user_from_progress_key(key: &str) -> Option<UserId> {
    key.strip_prefix(PROGRESS_PREFIX)
        .and_then(|raw| UserId::new(raw).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_key_round_trips() {
        let user = UserId::new("user007").unwrap();
        let key = progress_key(&user);
        assert_eq!(key, "userProgress_user007");
        assert_eq!(user_from_progress_key(&key), Some(user));
        assert_eq!(user_from_progress_key(LAST_SYNC), None);
    }
}
