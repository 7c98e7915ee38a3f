//! Activity fixtures and a mock OpenPhone API

use openphone_archiver::{Config, Credential, MemoryCredentialStore};
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Smallest byte sequence recognisable as a PNG header
pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

/// Token the fixture store hands out
pub const TEST_TOKEN: &str = "Bearer integration-test";

/// A text message
pub fn message(id: &str, created_at: &str, direction: &str, from: &str, body: &str) -> Value {
    json!({
        "id": id,
        "createdAt": created_at,
        "type": "message",
        "direction": direction,
        "from": from,
        "body": body,
        "media": []
    })
}

/// A call without summary or transcript, carrying the given media
pub fn call_with_media(id: &str, created_at: &str, from: &str, media: Vec<Value>) -> Value {
    json!({
        "id": id,
        "createdAt": created_at,
        "type": "call",
        "from": from,
        "media": media
    })
}

/// One media item pointing at `url`
pub fn media(url: String, mime_type: &str) -> Value {
    json!({ "url": url, "type": mime_type })
}

/// Mock activity API serving `pages` newest-first
///
/// Page `n` (0-based) is requested with `before=cursor-n`; every page but the
/// last reports `hasPreviousPage: true`.
pub async fn mount_pages(server: &MockServer, pages: Vec<Vec<Value>>) {
    let count = pages.len();
    // Cursor mocks first so requests carrying `before` never reach the first-page mock
    for (index, result) in pages.iter().enumerate().skip(1) {
        Mock::given(method("GET"))
            .and(path("/v2/activity"))
            .and(query_param("before", format!("cursor-{}", index)))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(
                result,
                index + 1 < count,
                index + 1,
            )))
            .mount(server)
            .await;
    }

    let first = pages.first().cloned().unwrap_or_default();
    Mock::given(method("GET"))
        .and(path("/v2/activity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&first, count > 1, 1)))
        .mount(server)
        .await;
}

fn page_body(result: &[Value], has_previous: bool, next_cursor: usize) -> Value {
    json!({
        "result": result,
        "pageInfo": {
            "hasPreviousPage": has_previous,
            "startId": format!("cursor-{}", next_cursor)
        }
    })
}

/// Serve `body` as `content_type` at `route`
pub async fn mount_media(server: &MockServer, route: &str, content_type: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", content_type)
                .set_body_bytes(body.to_vec()),
        )
        .mount(server)
        .await;
}

/// Config aimed at `server`, saving into `output`, with UTC date buckets
pub fn test_config(server: &MockServer, output: &TempDir) -> Config {
    let mut config = Config::default();
    config.api.base_url = server.uri();
    config.archive.output_dir = output.path().to_path_buf();
    config.archive.utc_offset_minutes = Some(0);
    config
}

/// Store that already observed [`TEST_TOKEN`]
pub fn logged_in_store() -> Arc<MemoryCredentialStore> {
    Arc::new(MemoryCredentialStore::with_credential(Credential::new(
        TEST_TOKEN,
    )))
}
