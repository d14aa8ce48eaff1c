use std::net::TcpListener;

use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serde_json::json;

use lms_core::model::{ChapterCompletion, UserId, UserProgress};
use lms_core::time::fixed_now;
use services::{
    ChapterEvent, PushOutcome, RemoteSync, SheetsClient, SheetsReadConfig, SyncConfig, SyncError,
    WriteResponseMode,
};

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

fn config(server: &MockServer, mode: WriteResponseMode) -> SyncConfig {
    let mut config = SyncConfig::local_only();
    config.write_url = Some(server.url("/exec"));
    config.write_response = mode;
    config.read = Some(SheetsReadConfig {
        base_url: server.url("/v4/spreadsheets"),
        spreadsheet_id: "sheet-1".into(),
        range: "Progress!A:G".into(),
        api_key: "test-key".into(),
    });
    config
}

fn event() -> ChapterEvent {
    let mut progress = UserProgress::new(UserId::new("user001").unwrap(), 27, fixed_now());
    let completion = ChapterCompletion::new(
        "lesson1_chapter1".parse().unwrap(),
        "What generative AI is",
        fixed_now(),
    );
    progress.record_completion(completion.clone());
    progress.stamp(fixed_now());
    ChapterEvent::new(&progress, &completion)
}

#[tokio::test]
async fn push_posts_camel_case_event() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start_async().await;
    let write = server.mock(|when, then| {
        when.method(POST).path("/exec").json_body(json!({
            "userId": "user001",
            "lessonId": "lesson1",
            "chapterId": "chapter1",
            "chapterTitle": "What generative AI is",
            "completedAt": "2023-11-14T22:13:20Z",
            "completedChapters": 1,
            "totalChapters": 27,
            "completionRate": 4
        }));
        then.status(200).body("ok");
    });

    let client = SheetsClient::from_config(&config(&server, WriteResponseMode::Opaque)).unwrap();
    let outcome = client.push(&event()).await.unwrap();
    assert_eq!(outcome, PushOutcome::Dispatched);
    write.assert_hits(1);
}

#[tokio::test]
async fn opaque_push_ignores_response_status() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/exec");
        then.status(500);
    });

    let client = SheetsClient::from_config(&config(&server, WriteResponseMode::Opaque)).unwrap();
    assert_eq!(client.push(&event()).await.unwrap(), PushOutcome::Dispatched);
}

#[tokio::test]
async fn json_push_reads_success_flag() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start_async().await;
    let mut ok = server.mock(|when, then| {
        when.method(POST).path("/exec");
        then.status(200).json_body(json!({ "success": true }));
    });

    let client = SheetsClient::from_config(&config(&server, WriteResponseMode::Json)).unwrap();
    assert_eq!(client.push(&event()).await.unwrap(), PushOutcome::Confirmed);
    ok.delete();

    server.mock(|when, then| {
        when.method(POST).path("/exec");
        then.status(200)
            .json_body(json!({ "success": false, "error": "sheet locked" }));
    });
    let err = client.push(&event()).await.unwrap_err();
    assert!(matches!(err, SyncError::Rejected(ref msg) if msg == "sheet locked"));
}

#[tokio::test]
async fn json_push_reports_http_status() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/exec");
        then.status(503);
    });

    let client = SheetsClient::from_config(&config(&server, WriteResponseMode::Json)).unwrap();
    let err = client.push(&event()).await.unwrap_err();
    assert!(matches!(err, SyncError::HttpStatus(status) if status.as_u16() == 503));
    assert!(err.is_remote_unavailable());
}

#[tokio::test]
async fn pull_decodes_rows_and_skips_header() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start_async().await;
    let read = server.mock(|when, then| {
        when.method(GET)
            .path_contains("/sheet-1/values/")
            .query_param("key", "test-key");
        then.status(200).json_body(json!({
            "range": "Progress!A1:G3",
            "values": [
                [
                    "userId", "userName", "totalChapters", "completedChapters",
                    "completionRate", "lastUpdated", "completedChaptersList"
                ],
                ["user001", "User 1", "27", "1", "4", "2023-11-14T22:13:20Z", "lesson1_chapter1"],
                ["", "orphan"]
            ]
        }));
    });

    let client = SheetsClient::from_config(&config(&server, WriteResponseMode::Opaque)).unwrap();
    let snapshot = client.pull().await.unwrap();
    read.assert_hits(1);

    assert_eq!(snapshot.rows.len(), 1);
    assert_eq!(snapshot.malformed.len(), 1);
    let row = &snapshot.rows[0];
    assert_eq!(row.user_id.as_str(), "user001");
    assert_eq!(row.total_chapters, Some(27));
    assert_eq!(row.last_updated, Some(fixed_now()));
    assert_eq!(row.chapters.len(), 1);
}

#[tokio::test]
async fn pull_without_values_is_empty() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path_contains("/values/");
        then.status(200).json_body(json!({ "range": "Progress!A1:G1" }));
    });

    let client = SheetsClient::from_config(&config(&server, WriteResponseMode::Opaque)).unwrap();
    let snapshot = client.pull().await.unwrap();
    assert!(snapshot.is_empty());
    assert!(snapshot.malformed.is_empty());
}

#[tokio::test]
async fn pull_failures_are_remote_unavailable() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }
    let server = MockServer::start_async().await;
    let mut forbidden = server.mock(|when, then| {
        when.method(GET).path_contains("/values/");
        then.status(403).body("denied");
    });

    let client = SheetsClient::from_config(&config(&server, WriteResponseMode::Opaque)).unwrap();
    let err = client.pull().await.unwrap_err();
    assert!(matches!(err, SyncError::HttpStatus(status) if status.as_u16() == 403));
    forbidden.delete();

    server.mock(|when, then| {
        when.method(GET).path_contains("/values/");
        then.status(200).body("<html>not json</html>");
    });
    let err = client.pull().await.unwrap_err();
    assert!(matches!(err, SyncError::MalformedPayload(_)));
    assert!(err.is_remote_unavailable());
}
