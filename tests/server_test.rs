//! End-to-end tests for the TLS webhook server.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine;
use mutating_webhook::admission::{AllowAll, LabelInjector};
use mutating_webhook::http::ServerError;
use mutating_webhook::WebhookServer;
use reqwest::StatusCode;

mod common;

#[tokio::test]
async fn serves_fixed_routes_over_tls() {
    let server = common::start_server(AllowAll).await;
    let client = server.client();

    let root = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(root.status(), StatusCode::OK);
    assert_eq!(
        root.text().await.unwrap(),
        "Hello from mutating-webhook! Mutation available on: /mutate"
    );

    for path in ["/_healthz", "/_ready"] {
        let res = client.get(server.url(path)).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.text().await.unwrap(), "ok");
    }

    server.server.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn negotiates_http2() {
    let server = common::start_server(AllowAll).await;

    let res = server.client().get(server.url("/_healthz")).send().await.unwrap();
    assert_eq!(res.version(), reqwest::Version::HTTP_2);
    assert!(res.headers().contains_key("x-request-id"));

    server.server.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn mutate_returns_base64_json_patch() {
    let labels = BTreeMap::from([("team".to_string(), "platform".to_string())]);
    let server = common::start_server(LabelInjector::new(labels)).await;

    let res = server
        .client()
        .post(server.url("/mutate"))
        .json(&common::pod_review("req-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "application/json");

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["apiVersion"], "admission.k8s.io/v1");
    assert_eq!(body["kind"], "AdmissionReview");
    assert!(body.get("request").is_none());

    let response = &body["response"];
    assert_eq!(response["uid"], "req-1");
    assert_eq!(response["allowed"], true);
    assert_eq!(response["patchType"], "JSONPatch");

    let patch = base64::engine::general_purpose::STANDARD
        .decode(response["patch"].as_str().unwrap())
        .unwrap();
    let ops: serde_json::Value = serde_json::from_slice(&patch).unwrap();
    assert_eq!(
        ops,
        serde_json::json!([
            {"op": "add", "path": "/metadata/labels/team", "value": "platform"}
        ])
    );

    server.server.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn non_json_request_is_rejected() {
    let server = common::start_server(AllowAll).await;
    let client = server.client();

    let res = client
        .post(server.url("/mutate"))
        .header("content-type", "text/plain")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(res.text().await.unwrap(), "JSON is expected");

    let res = client
        .post(server.url("/mutate"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.text().await.unwrap(), "missing media type");

    server.server.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn shutdown_stops_serving() {
    let server = common::start_server(AllowAll).await;
    let client = server.client();

    let url = server.url("/_healthz");
    server.server.shutdown(Duration::from_secs(5)).await.unwrap();

    let served = server.task.await.unwrap();
    assert!(served.is_ok());
    assert!(server.server.reloader().is_closed());
    assert!(client.get(url).send().await.is_err());
}

#[tokio::test]
async fn second_shutdown_reports_both_failures() {
    let server = common::start_server(AllowAll).await;

    server.server.shutdown(Duration::from_secs(5)).await.unwrap();
    let err = server.server.shutdown(Duration::from_secs(5)).await.unwrap_err();

    assert_eq!(err.failures.len(), 2);
    assert!(err.listener_failed());
    assert!(err.watcher_failed());
}

#[tokio::test]
async fn shutdown_before_start_fails_listener_only() {
    let dir = tempfile::tempdir().unwrap();
    let cert = common::TestCert::generate();
    let server = WebhookServer::new(
        std::sync::Arc::new(AllowAll),
        common::test_config(dir.path(), &cert),
    )
    .unwrap();

    let err = server.shutdown(Duration::from_secs(1)).await.unwrap_err();
    assert!(err.listener_failed());
    assert!(!err.watcher_failed());
    assert!(server.reloader().is_closed());

    assert!(matches!(server.start().await, Err(ServerError::AlreadyStarted)));
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let server = common::start_server(AllowAll).await;

    let err = server.server.start().await.unwrap_err();
    assert!(matches!(err, ServerError::AlreadyStarted));

    server.server.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn bind_failure_is_returned_from_start() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let cert = common::TestCert::generate();
    let mut config = common::test_config(dir.path(), &cert);
    config.addr = taken.local_addr().unwrap().to_string();

    let server = WebhookServer::new(std::sync::Arc::new(AllowAll), config).unwrap();
    let err = server.start().await.unwrap_err();

    assert!(matches!(err, ServerError::Serve(_)));
    let addr = tokio::time::timeout(Duration::from_secs(5), server.local_addr())
        .await
        .expect("local_addr must not wait after a failed bind");
    assert!(addr.is_none());
    server.reloader().close().await.unwrap();
}

#[tokio::test]
async fn missing_certificate_fails_construction() {
    let dir = tempfile::tempdir().unwrap();
    let config = mutating_webhook::ResolvedConfig {
        addr: "127.0.0.1:0".to_string(),
        cert_file_path: dir.path().join("missing.crt"),
        key_file_path: dir.path().join("missing.key"),
        ..Default::default()
    };

    let err = WebhookServer::new(std::sync::Arc::new(AllowAll), config).unwrap_err();
    assert!(matches!(err, ServerError::Reloader(_)));
}
