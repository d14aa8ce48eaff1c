use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use lms_core::model::{ChapterCompletion, ChapterId, LessonId, SheetSnapshot, UserId, UserProgress};

use crate::config::{SheetsReadConfig, SyncConfig, WriteResponseMode};
use crate::error::SyncError;

/// One completion as posted to the write endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterEvent {
    pub user_id: UserId,
    pub lesson_id: LessonId,
    pub chapter_id: ChapterId,
    pub chapter_title: String,
    pub completed_at: DateTime<Utc>,
    pub completed_chapters: u32,
    pub total_chapters: u32,
    pub completion_rate: u32,
}

impl ChapterEvent {
    /// Event for `completion`, carrying the record's totals after it was
    /// applied.
    #[must_use]
    pub fn new(progress: &UserProgress, completion: &ChapterCompletion) -> Self {
        Self {
            user_id: progress.user_id().clone(),
            lesson_id: completion.lesson_id.clone(),
            chapter_id: completion.chapter_id.clone(),
            chapter_title: completion.chapter_title.clone(),
            completed_at: completion.completed_at,
            completed_chapters: progress.completed_count(),
            total_chapters: progress.total_chapters(),
            completion_rate: progress.completion_rate(),
        }
    }
}

/// What a successful push is known to have achieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// The endpoint acknowledged the write.
    Confirmed,
    /// The request went out without a transport error; the endpoint's
    /// answer could not be read.
    Dispatched,
}

/// Push/pull access to the remote progress sheet.
#[async_trait]
pub trait RemoteSync: Send + Sync {
    /// Send one completion event.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` when the request fails or is rejected.
    async fn push(&self, event: &ChapterEvent) -> Result<PushOutcome, SyncError>;

    /// Fetch and decode the whole progress range.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` on transport failures, non-success statuses, or
    /// an undecodable body.
    async fn pull(&self) -> Result<SheetSnapshot, SyncError>;

    fn can_push(&self) -> bool {
        true
    }

    fn can_pull(&self) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Option<Vec<Vec<serde_json::Value>>>,
}

/// HTTP client for an apps-script style write URL and a Sheets values range.
#[derive(Clone, Debug)]
pub struct SheetsClient {
    http: Client,
    write_url: Option<Url>,
    write_response: WriteResponseMode,
    read_url: Option<Url>,
}

impl SheetsClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` for unparseable URLs and
    /// `SyncError::Http` if the HTTP client cannot be built.
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        let write_url = config
            .write_url
            .as_deref()
            .map(|raw| Url::parse(raw).map_err(|e| SyncError::Config(format!("write url: {e}"))))
            .transpose()?;
        let read_url = config.read.as_ref().map(values_url).transpose()?;
        Ok(Self {
            http,
            write_url,
            write_response: config.write_response,
            read_url,
        })
    }
}

/// `{base}/{spreadsheet_id}/values/{range}?key={api_key}`
fn values_url(read: &SheetsReadConfig) -> Result<Url, SyncError> {
    let mut url = Url::parse(&read.base_url)
        .map_err(|e| SyncError::Config(format!("sheets base url: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| SyncError::Config("sheets base url cannot be a base".into()))?
        .pop_if_empty()
        .extend([read.spreadsheet_id.as_str(), "values", read.range.as_str()]);
    url.query_pairs_mut().append_pair("key", &read.api_key);
    Ok(url)
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

#[async_trait]
impl RemoteSync for SheetsClient {
    async fn push(&self, event: &ChapterEvent) -> Result<PushOutcome, SyncError> {
        let url = self.write_url.clone().ok_or(SyncError::Disabled)?;
        let response = self.http.post(url).json(event).send().await?;

        match self.write_response {
            WriteResponseMode::Opaque => Ok(PushOutcome::Dispatched),
            WriteResponseMode::Json => {
                let status = response.status();
                if !status.is_success() {
                    return Err(SyncError::HttpStatus(status));
                }
                let body: WriteResponse = response
                    .json()
                    .await
                    .map_err(|e| SyncError::MalformedPayload(e.to_string()))?;
                if body.success {
                    Ok(PushOutcome::Confirmed)
                } else {
                    Err(SyncError::Rejected(
                        body.error.unwrap_or_else(|| "unknown error".into()),
                    ))
                }
            }
        }
    }

    async fn pull(&self) -> Result<SheetSnapshot, SyncError> {
        let url = self.read_url.clone().ok_or(SyncError::Disabled)?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::HttpStatus(status));
        }
        let body: ValueRange = response
            .json()
            .await
            .map_err(|e| SyncError::MalformedPayload(e.to_string()))?;

        let values: Vec<Vec<String>> = body
            .values
            .unwrap_or_default()
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect();
        Ok(SheetSnapshot::from_values(&values))
    }

    fn can_push(&self) -> bool {
        self.write_url.is_some()
    }

    fn can_pull(&self) -> bool {
        self.read_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_config(base_url: &str) -> SheetsReadConfig {
        SheetsReadConfig {
            base_url: base_url.into(),
            spreadsheet_id: "sheet-1".into(),
            range: "Progress!A:G".into(),
            api_key: "k&y".into(),
        }
    }

    #[test]
    fn values_url_escapes_range_and_key() {
        let url = values_url(&read_config("https://sheets.example.test/v4/spreadsheets/")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.example.test/v4/spreadsheets/sheet-1/values/Progress!A:G?key=k%26y"
        );
    }

    #[test]
    fn unparseable_urls_are_config_errors() {
        let mut config = SyncConfig::local_only();
        config.write_url = Some("not a url".into());
        assert!(matches!(
            SheetsClient::from_config(&config),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn local_only_client_cannot_push_or_pull() {
        let client = SheetsClient::from_config(&SyncConfig::local_only()).unwrap();
        assert!(!client.can_push());
        assert!(!client.can_pull());
    }

    #[test]
    fn non_string_cells_become_text() {
        assert_eq!(cell_text(serde_json::json!(27)), "27");
        assert_eq!(cell_text(serde_json::Value::Null), "");
        assert_eq!(cell_text(serde_json::json!("x")), "x");
    }
}
