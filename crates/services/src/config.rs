use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::sync::RetryPolicy;

pub const DEFAULT_SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
pub const DEFAULT_SHEET_RANGE: &str = "Progress!A:G";
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How the write endpoint answers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteResponseMode {
    /// The response cannot be inspected; a request that reaches the server
    /// counts as dispatched.
    #[default]
    Opaque,
    /// The endpoint answers `{ "success": bool, "error"?: string }`.
    Json,
}

impl FromStr for WriteResponseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "opaque" | "no-cors" => Ok(Self::Opaque),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown write response mode: {other}")),
        }
    }
}

/// Read side: a sheet value range fetched with an API key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SheetsReadConfig {
    pub base_url: String,
    pub spreadsheet_id: String,
    pub range: String,
    pub api_key: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    pub write_url: Option<String>,
    pub write_response: WriteResponseMode,
    pub read: Option<SheetsReadConfig>,
    pub sync_interval: Duration,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::local_only()
    }
}

impl SyncConfig {
    /// No endpoints: progress stays on this machine.
    #[must_use]
    pub fn local_only() -> Self {
        Self {
            write_url: None,
            write_response: WriteResponseMode::default(),
            read: None,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    ///
    /// Blank values count as unset. Unparseable numbers fall back to the
    /// defaults.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let number = |name: &str| var(name).and_then(|v| v.trim().parse::<u64>().ok());

        let write_url = var("LMS_WRITE_URL");
        let write_response = var("LMS_WRITE_RESPONSE")
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();

        let read = match (var("LMS_SPREADSHEET_ID"), var("LMS_API_KEY")) {
            (Some(spreadsheet_id), Some(api_key)) => Some(SheetsReadConfig {
                base_url: var("LMS_SHEETS_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_SHEETS_BASE_URL.into()),
                spreadsheet_id,
                range: var("LMS_SHEET_RANGE").unwrap_or_else(|| DEFAULT_SHEET_RANGE.into()),
                api_key,
            }),
            _ => None,
        };

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: number("LMS_MAX_RETRY_ATTEMPTS")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.max_attempts),
            base_delay: number("LMS_RETRY_DELAY_MS")
                .map_or(defaults.base_delay, Duration::from_millis),
        };

        Self {
            write_url,
            write_response,
            read,
            sync_interval: number("LMS_SYNC_INTERVAL_SECS")
                .filter(|n| *n > 0)
                .map_or(DEFAULT_SYNC_INTERVAL, Duration::from_secs),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry,
        }
    }

    #[must_use]
    pub fn is_local_only(&self) -> bool {
        self.write_url.is_none() && self.read.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_environment_is_local_only() {
        let config = SyncConfig::from_lookup(lookup(&[]));
        assert!(config.is_local_only());
        assert_eq!(config.sync_interval, Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(1000));
    }

    #[test]
    fn read_side_requires_sheet_and_key() {
        let config = SyncConfig::from_lookup(lookup(&[("LMS_SPREADSHEET_ID", "abc")]));
        assert!(config.read.is_none());

        let config = SyncConfig::from_lookup(lookup(&[
            ("LMS_SPREADSHEET_ID", "abc"),
            ("LMS_API_KEY", "key"),
        ]));
        let read = config.read.unwrap();
        assert_eq!(read.base_url, DEFAULT_SHEETS_BASE_URL);
        assert_eq!(read.range, DEFAULT_SHEET_RANGE);
    }

    #[test]
    fn overrides_are_applied() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("LMS_WRITE_URL", "https://example.test/exec"),
            ("LMS_WRITE_RESPONSE", "json"),
            ("LMS_SYNC_INTERVAL_SECS", "5"),
            ("LMS_MAX_RETRY_ATTEMPTS", "5"),
            ("LMS_RETRY_DELAY_MS", "250"),
        ]));
        assert_eq!(config.write_response, WriteResponseMode::Json);
        assert_eq!(config.sync_interval, Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
    }

    #[test]
    fn bad_numbers_fall_back() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("LMS_SYNC_INTERVAL_SECS", "0"),
            ("LMS_MAX_RETRY_ATTEMPTS", "three"),
            ("LMS_WRITE_RESPONSE", "xml"),
        ]));
        assert_eq!(config.sync_interval, DEFAULT_SYNC_INTERVAL);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.write_response, WriteResponseMode::Opaque);
    }
}
