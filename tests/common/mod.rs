//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mutating_webhook::admission::Mutator;
use mutating_webhook::http::ServerError;
use mutating_webhook::{ResolvedConfig, WebhookServer};
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// A self-signed `localhost` pair written to disk.
pub struct TestCert {
    pub cert_pem: String,
    pub key_pem: String,
}

impl TestCert {
    pub fn generate() -> Self {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        Self {
            cert_pem: generated.cert.pem(),
            key_pem: generated.key_pair.serialize_pem(),
        }
    }

    pub fn write_to(&self, dir: &Path) -> (PathBuf, PathBuf) {
        let cert_path = dir.join("tls.crt");
        let key_path = dir.join("tls.key");
        std::fs::write(&cert_path, &self.cert_pem).unwrap();
        std::fs::write(&key_path, &self.key_pem).unwrap();
        (cert_path, key_path)
    }
}

/// A running server plus everything needed to talk to it.
pub struct TestServer {
    pub server: Arc<WebhookServer>,
    pub addr: SocketAddr,
    pub cert: TestCert,
    pub dir: TempDir,
    pub task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("https://localhost:{}{}", self.addr.port(), path)
    }

    pub fn client(&self) -> reqwest::Client {
        client_trusting(&self.cert.cert_pem, self.addr)
    }
}

pub fn test_config(dir: &Path, cert: &TestCert) -> ResolvedConfig {
    let (cert_file_path, key_file_path) = cert.write_to(dir);
    ResolvedConfig {
        addr: "127.0.0.1:0".to_string(),
        cert_file_path,
        key_file_path,
        ..ResolvedConfig::default()
    }
}

/// Start a server on an ephemeral port and wait until it is listening.
pub async fn start_server(mutator: impl Mutator) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let cert = TestCert::generate();
    let config = test_config(dir.path(), &cert);

    let server = Arc::new(WebhookServer::new(Arc::new(mutator), config).unwrap());
    let task = tokio::spawn({
        let server = server.clone();
        async move { server.start().await }
    });
    let addr = tokio::time::timeout(Duration::from_secs(5), server.local_addr())
        .await
        .expect("server did not bind in time")
        .expect("server failed to bind");

    TestServer {
        server,
        addr,
        cert,
        dir,
        task,
    }
}

/// A client that trusts only `cert_pem` and opens a fresh connection per request.
pub fn client_trusting(cert_pem: &str, addr: SocketAddr) -> reqwest::Client {
    let cert = reqwest::Certificate::from_pem(cert_pem.as_bytes()).unwrap();
    reqwest::Client::builder()
        .use_rustls_tls()
        .tls_built_in_root_certs(false)
        .add_root_certificate(cert)
        .resolve("localhost", addr)
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// A review body for a pod with the given labels.
pub fn pod_review(uid: &str) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": uid,
            "kind": {"group": "", "version": "v1", "kind": "Pod"},
            "resource": {"group": "", "version": "v1", "resource": "pods"},
            "namespace": "default",
            "operation": "CREATE",
            "userInfo": {"username": "system:admin"},
            "object": {
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {"name": "web", "labels": {"app": "web"}}
            }
        }
    })
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}
