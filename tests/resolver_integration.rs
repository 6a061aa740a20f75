//! Integration tests for cloud sharing link resolution.
//!
//! A wiremock server stands in for the sharing host; the sharing URL keeps the
//! `/:u:/r/` token form so the usual candidate set is generated against it.

use mediadl_core::resolver::{CloudLinkResolver, part_path};
use mediadl_core::{ErrorKind, Severity};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;
use support::{RecordingSink, ScriptedEngine};

const FILE_PATH: &str = "/personal/u/Documents/notes.zip";
const SHARING_PATH: &str = "/:u:/r/personal/u/Documents/notes.zip";
const ZIP_BYTES: &[u8] = b"PK\x03\x04archive-bytes";

fn sharing_url(server: &MockServer) -> String {
    format!("{}{SHARING_PATH}", server.uri())
}

async fn mount_html(server: &MockServer, at: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

async fn mount_bytes(server: &MockServer, at: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/octet-stream")
                .set_body_bytes(body.to_vec()),
        )
        .mount(server)
        .await;
}

// ==================== Candidate Probing Tests ====================

#[tokio::test]
async fn test_access_denied_page_is_skipped_for_next_candidate() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    mount_html(
        &server,
        FILE_PATH,
        "<html><body><h1>Access denied</h1></body></html>",
    )
    .await;
    mount_bytes(&server, "/_layouts/15/download.aspx", ZIP_BYTES).await;

    let engine = ScriptedEngine::new([]);
    let sink = RecordingSink::default();
    let cancel = CancellationToken::new();
    let outcome = CloudLinkResolver::new(&engine, &sink, &cancel)
        .resolve(&sharing_url(&server), dir.path(), None)
        .await
        .unwrap();

    assert!(outcome.success, "{outcome:?}");
    assert_eq!(outcome.chosen.as_deref(), Some("download-aspx"));
    let dest = dir.path().join("notes.zip");
    assert_eq!(std::fs::read(&dest).unwrap(), ZIP_BYTES);
    assert!(!part_path(&dest).exists());
    assert_eq!(engine.call_count(), 0);
    assert!(sink.has(Severity::Info, "Trying direct-path (1/"));
}

#[tokio::test]
async fn test_client_side_redirect_is_followed() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    mount_html(
        &server,
        FILE_PATH,
        r#"<html><script>window.location.href = "/real/notes.zip";</script></html>"#,
    )
    .await;
    mount_bytes(&server, "/real/notes.zip", ZIP_BYTES).await;

    let engine = ScriptedEngine::new([]);
    let sink = RecordingSink::default();
    let cancel = CancellationToken::new();
    let outcome = CloudLinkResolver::new(&engine, &sink, &cancel)
        .resolve(&sharing_url(&server), dir.path(), None)
        .await
        .unwrap();

    assert!(outcome.success, "{outcome:?}");
    assert_eq!(outcome.chosen.as_deref(), Some("direct-path"));
    assert_eq!(outcome.bytes_written, ZIP_BYTES.len() as u64);
}

// ==================== Page Link Tests ====================

#[tokio::test]
async fn test_page_links_are_tried_after_candidates() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    mount_html(
        &server,
        SHARING_PATH,
        r#"<html><body><a href="/files/notes.zip">Get the file</a></body></html>"#,
    )
    .await;
    mount_bytes(&server, "/files/notes.zip", ZIP_BYTES).await;

    let engine = ScriptedEngine::new([]);
    let sink = RecordingSink::default();
    let cancel = CancellationToken::new();
    let outcome = CloudLinkResolver::new(&engine, &sink, &cancel)
        .resolve(&sharing_url(&server), dir.path(), None)
        .await
        .unwrap();

    assert!(outcome.success, "{outcome:?}");
    assert_eq!(outcome.chosen.as_deref(), Some("page-link"));
    assert_eq!(
        std::fs::read(dir.path().join("notes.zip")).unwrap(),
        ZIP_BYTES
    );
    assert!(sink.has(Severity::Info, "Scanning sharing page"));
    assert_eq!(engine.call_count(), 0);
}

// ==================== Engine Fallback Tests ====================

#[tokio::test]
async fn test_zero_byte_body_falls_through_to_engine() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();
    mount_bytes(&server, "/_layouts/15/download.aspx", b"").await;

    let engine = ScriptedEngine::new([Ok(())]).with_output(ZIP_BYTES);
    let sink = RecordingSink::default();
    let cancel = CancellationToken::new();
    let outcome = CloudLinkResolver::new(&engine, &sink, &cancel)
        .resolve(&sharing_url(&server), dir.path(), None)
        .await
        .unwrap();

    assert!(outcome.success, "{outcome:?}");
    assert_eq!(outcome.chosen.as_deref(), Some("engine-fallback"));
    assert_eq!(outcome.bytes_written, ZIP_BYTES.len() as u64);

    let calls = engine.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].url, sharing_url(&server));
    assert_eq!(calls[0].output_name.as_deref(), Some("notes.zip"));
    assert_eq!(calls[0].profile.name, "resolver-fallback");
    assert!(outcome.engine_attempt.is_some());

    let dest = dir.path().join("notes.zip");
    assert!(!part_path(&dest).exists());
    assert!(sink.has(Severity::Warning, "handing the link to scripted"));
}

#[tokio::test]
async fn test_engine_success_without_file_is_reported_as_failure() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();

    let engine = ScriptedEngine::new([Ok(())]);
    let sink = RecordingSink::default();
    let cancel = CancellationToken::new();
    let outcome = CloudLinkResolver::new(&engine, &sink, &cancel)
        .resolve(&sharing_url(&server), dir.path(), None)
        .await
        .unwrap();

    assert!(!outcome.success, "{outcome:?}");
    assert_eq!(outcome.error, Some(ErrorKind::Validation));
    assert_eq!(outcome.bytes_written, 0);
    assert_eq!(engine.call_count(), 1);
    assert!(sink.has(Severity::Error, "missing or empty"));
}

#[tokio::test]
async fn test_engine_failure_after_all_candidates_is_reported() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let dir = TempDir::new().unwrap();

    let engine = ScriptedEngine::new([Err("ERROR: Unsupported URL: sharing page")]);
    let sink = RecordingSink::default();
    let cancel = CancellationToken::new();
    let outcome = CloudLinkResolver::new(&engine, &sink, &cancel)
        .resolve(&sharing_url(&server), dir.path(), None)
        .await
        .unwrap();

    assert!(!outcome.success);
    assert!(!outcome.cancelled);
    assert_eq!(outcome.error, Some(ErrorKind::Validation));
    assert_eq!(engine.call_count(), 1);
    assert!(sink.has(Severity::Error, "Could not resolve sharing link"));
    assert!(!dir.path().join("notes.zip").exists());
}
