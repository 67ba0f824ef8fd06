//! Integration tests for the hosting-library relay

use tempfile::TempDir;
use vid_harvest::config::RelayConfig;
use vid_harvest::pipeline::{BunnyRelay, Relay, RetryPolicy};
use vid_harvest::HarvestError;
use wiremock::matchers::{body_bytes, body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn relay_for(server: &MockServer) -> BunnyRelay {
    let config = RelayConfig {
        base_url: format!("{}/library", server.uri()),
        library_id: Some("42".to_string()),
        access_key: Some("secret-key".to_string()),
        max_attempts: 3,
        timeout_secs: 5,
    };
    BunnyRelay::new(&config, None)
        .expect("Failed to build relay")
        .with_retry_policy(RetryPolicy::immediate(3))
}

#[tokio::test]
async fn test_register_returns_remote_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/library/42/videos"))
        .and(header("AccessKey", "secret-key"))
        .and(body_json(serde_json::json!({ "title": "Sunset clip" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "guid": "abc-123" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let remote_id = relay_for(&server)
        .register("Sunset clip")
        .await
        .expect("Register failed");

    assert_eq!(remote_id, "abc-123");
}

#[tokio::test]
async fn test_register_without_guid_fails() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/library/42/videos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let err = relay_for(&server).register("No id").await.unwrap_err();
    assert!(matches!(err, HarvestError::Relay { .. }));
}

#[tokio::test]
async fn test_transfer_streams_artifact_bytes() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let artifact = dir.path().join("clip.mp4");
    std::fs::write(&artifact, b"fake mp4 payload").unwrap();

    Mock::given(method("PUT"))
        .and(path("/library/42/videos/abc-123"))
        .and(header("AccessKey", "secret-key"))
        .and(body_bytes(b"fake mp4 payload".to_vec()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    relay_for(&server)
        .transfer("abc-123", &artifact)
        .await
        .expect("Transfer failed");
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/library/42/videos"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/library/42/videos"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "guid": "after-retry" })),
        )
        .mount(&server)
        .await;

    let remote_id = relay_for(&server).register("Retry me").await.unwrap();

    assert_eq!(remote_id, "after-retry");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_rejected_credentials_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/library/42/videos"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Invalid AccessKey"))
        .expect(1)
        .mount(&server)
        .await;

    let err = relay_for(&server).register("Denied").await.unwrap_err();
    let message = err.to_string();

    assert!(matches!(err, HarvestError::Relay { .. }));
    assert!(message.contains("HTTP 401"), "unexpected message: {}", message);
    assert!(message.contains("Invalid AccessKey"));
}

#[tokio::test]
async fn test_persistent_server_error_gives_up_after_max_attempts() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let artifact = dir.path().join("clip.mp4");
    std::fs::write(&artifact, b"bytes").unwrap();

    Mock::given(method("PUT"))
        .and(path("/library/42/videos/abc-123"))
        .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(500)))
        .expect(3)
        .mount(&server)
        .await;

    let err = relay_for(&server)
        .transfer("abc-123", &artifact)
        .await
        .unwrap_err();
    let message = err.to_string();

    assert!(message.contains("Failed to upload binary (HTTP 500)"));
    // The server body is cut down to an excerpt
    assert!(!message.contains(&"x".repeat(201)));
}

#[tokio::test]
async fn test_get_asset_info() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/library/42/videos/known"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "guid": "known", "status": 4 })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/library/42/videos/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let relay = relay_for(&server);

    let info = relay.get_asset_info("known").await.unwrap().unwrap();
    assert_eq!(info["status"], 4);
    assert!(relay.get_asset_info("missing").await.unwrap().is_none());
}

#[test]
fn test_missing_credentials_fail_fast() {
    let config = RelayConfig {
        access_key: None,
        library_id: Some("42".to_string()),
        ..RelayConfig::default()
    };

    let err = BunnyRelay::new(&config, None).unwrap_err();
    assert!(matches!(err, HarvestError::Configuration(_)));
}
