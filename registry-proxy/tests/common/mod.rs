//! Common test utilities and helpers
//!
//! Integration tests run the proxy in-process through `axum-test` and point it
//! at a synthetic registry bound to a real loopback socket.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use axum_test::TestServer;
use registry_proxy::{
    build_router, AppState, Config, RenderedReport, ReportDelivery, ReportError,
};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Location returned by the synthetic registry for blob redirects
pub const BLOB_LOCATION: &str = "https://blobs.example.com/sha256/abc?sig=xyz";

/// Blob served at `.../blobs/sha256:feed`; deliberately not valid UTF-8
pub const BLOB_BYTES: &[u8] = &[
    0x1f, 0x8b, 0x08, 0x00, 0x00, 0xff, 0xfe, 0x80, 0xc3, 0x28, 0x00, 0x0d, 0x0a, 0xf5,
];

/// Digest header value returned with [`BLOB_BYTES`]
pub const BLOB_DIGEST: &str =
    "sha256:feedfeedfeedfeedfeedfeedfeedfeedfeedfeedfeedfeedfeedfeedfeedfeed";

/// Synthetic upstream registry listening on `127.0.0.1`.
pub struct TestUpstream {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TestUpstream {
    pub fn base_url(&self) -> String {
        format!("http://{}/v2", self.addr)
    }
}

impl Drop for TestUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Echoes the request back as JSON, except for a few special paths:
///
/// - `/v2/slow/...` never answers in time
/// - `.../blobs/redirect` answers 307 with [`BLOB_LOCATION`]
/// - `/v2/` answers 401 with a bearer challenge, like ghcr.io
/// - `.../blobs/sha256:feed` serves [`BLOB_BYTES`] as a registry would
/// - `.../uploads/raw` returns the received body unchanged
async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let path = uri.path().to_string();

    if path.ends_with("/blobs/sha256:feed") {
        return (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                (header::CONTENT_LENGTH, BLOB_BYTES.len().to_string()),
                (
                    header::HeaderName::from_static("docker-content-digest"),
                    BLOB_DIGEST.to_string(),
                ),
            ],
            Bytes::from_static(BLOB_BYTES),
        )
            .into_response();
    }
    if path.ends_with("/uploads/raw") {
        return (
            StatusCode::CREATED,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            body,
        )
            .into_response();
    }

    if path.starts_with("/v2/slow") {
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
    if path.ends_with("/blobs/redirect") {
        return (
            StatusCode::TEMPORARY_REDIRECT,
            [(header::LOCATION, BLOB_LOCATION)],
        )
            .into_response();
    }
    if path == "/v2/" {
        return (
            StatusCode::UNAUTHORIZED,
            [
                (
                    header::WWW_AUTHENTICATE,
                    r#"Bearer realm="https://ghcr.io/token",service="ghcr.io""#,
                ),
                (
                    header::HeaderName::from_static("docker-distribution-api-version"),
                    "registry/2.0",
                ),
            ],
            Json(json!({ "errors": [{ "code": "UNAUTHORIZED" }] })),
        )
            .into_response();
    }

    let mut seen = Map::new();
    for (name, value) in headers.iter() {
        seen.insert(
            name.as_str().to_string(),
            Value::String(value.to_str().unwrap_or_default().to_string()),
        );
    }

    let status = if method == Method::POST {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };

    (
        status,
        [(
            header::HeaderName::from_static("x-upstream"),
            "synthetic-registry",
        )],
        Json(json!({
            "method": method.as_str(),
            "path": path,
            "query": uri.query(),
            "headers": seen,
            "body": String::from_utf8_lossy(&body),
        })),
    )
        .into_response()
}

/// Start the synthetic registry on an ephemeral port.
pub async fn spawn_upstream() -> TestUpstream {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind synthetic upstream");
    let addr = listener.local_addr().expect("local addr");
    let app = Router::new().fallback(echo);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    TestUpstream { addr, handle }
}

/// Default configuration aimed at `upstream`.
pub fn proxy_config(upstream: &TestUpstream) -> Config {
    let mut config = Config::default();
    config.upstream.base_url = Some(upstream.base_url());
    config.upstream.timeout_secs = 1;
    config
}

/// Collects delivered reports instead of sending them.
#[derive(Default)]
pub struct RecordingDelivery {
    pub sent: Mutex<Vec<RenderedReport>>,
    pub fail: bool,
}

#[async_trait]
impl ReportDelivery for RecordingDelivery {
    async fn deliver(&self, report: &RenderedReport) -> Result<usize, ReportError> {
        if self.fail {
            return Err(ReportError::Delivery("535 authentication failed".into()));
        }
        self.sent.lock().unwrap().push(report.clone());
        Ok(1)
    }
}

/// Proxy under test plus its shared state.
pub struct TestSetup {
    pub server: TestServer,
    pub state: Arc<AppState>,
}

pub fn create_test_server(
    config: Config,
    delivery: Option<Arc<dyn ReportDelivery>>,
) -> TestSetup {
    let state = Arc::new(
        AppState::with_delivery(config, delivery).expect("Failed to build app state"),
    );
    let server =
        TestServer::new(build_router(state.clone())).expect("Failed to create test server");
    TestSetup { server, state }
}
