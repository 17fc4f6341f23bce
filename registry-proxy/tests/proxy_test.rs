//! Integration tests for the `/v2/` relay
//!
//! Each test runs the proxy in-process against the synthetic registry from
//! `common` and checks what the client sees and what the registry saw.

use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::{Method, StatusCode};
use serde_json::Value;

mod common;
use common::{
    create_test_server, proxy_config, spawn_upstream, BLOB_BYTES, BLOB_DIGEST, BLOB_LOCATION,
};

#[tokio::test]
async fn test_round_trip_preserves_status_headers_and_body() {
    let upstream = spawn_upstream().await;
    let setup = create_test_server(proxy_config(&upstream), None);

    let response = setup
        .server
        .post("/v2/acme/app/blobs/uploads/")
        .add_header("X-Forwarded-For", "203.0.113.7")
        .add_header("Authorization", "Bearer abc123")
        .add_header("X-Custom-Trace", "trace-1")
        .text("layer-bytes")
        .await;

    response.assert_status(StatusCode::ACCEPTED);
    assert_eq!(response.header("x-upstream"), "synthetic-registry");

    let echoed: Value = response.json();
    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["path"], "/v2/acme/app/blobs/uploads/");
    assert_eq!(echoed["body"], "layer-bytes");
    assert_eq!(echoed["headers"]["authorization"], "Bearer abc123");
    assert_eq!(echoed["headers"]["x-custom-trace"], "trace-1");
    assert_eq!(echoed["headers"]["x-forwarded-for"], "203.0.113.7");
}

#[tokio::test]
async fn test_binary_blob_relayed_byte_for_byte() {
    let upstream = spawn_upstream().await;
    let setup = create_test_server(proxy_config(&upstream), None);

    let response = setup.server.get("/v2/acme/app/blobs/sha256:feed").await;

    response.assert_status_ok();
    assert_eq!(response.as_bytes().as_ref(), BLOB_BYTES);
    assert_eq!(response.header("docker-content-digest"), BLOB_DIGEST);
    assert_eq!(
        response.header("content-length"),
        BLOB_BYTES.len().to_string().as_str()
    );
}

#[tokio::test]
async fn test_head_relays_blob_headers_without_body() {
    let upstream = spawn_upstream().await;
    let setup = create_test_server(proxy_config(&upstream), None);

    let response = setup
        .server
        .method(Method::HEAD, "/v2/acme/app/blobs/sha256:feed")
        .await;

    response.assert_status_ok();
    assert!(response.as_bytes().is_empty());
    assert_eq!(response.header("docker-content-digest"), BLOB_DIGEST);
    assert_eq!(
        response.header("content-length"),
        BLOB_BYTES.len().to_string().as_str()
    );
}

#[tokio::test]
async fn test_binary_upload_arrives_unchanged() {
    let upstream = spawn_upstream().await;
    let setup = create_test_server(proxy_config(&upstream), None);

    let response = setup
        .server
        .put("/v2/acme/app/blobs/uploads/raw")
        .bytes(Bytes::from_static(BLOB_BYTES))
        .await;

    response.assert_status(StatusCode::CREATED);
    assert_eq!(response.as_bytes().as_ref(), BLOB_BYTES);
}

#[tokio::test]
async fn test_host_header_is_the_upstreams_own() {
    let upstream = spawn_upstream().await;
    let setup = create_test_server(proxy_config(&upstream), None);

    let response = setup
        .server
        .get("/v2/acme/app/tags/list")
        .add_header("Host", "proxy.example.com")
        .await;

    response.assert_status_ok();
    let echoed: Value = response.json();
    assert_eq!(
        echoed["headers"]["host"],
        Value::String(upstream.addr.to_string())
    );
}

#[tokio::test]
async fn test_manifest_pull_is_counted() {
    let upstream = spawn_upstream().await;
    let setup = create_test_server(proxy_config(&upstream), None);

    setup
        .server
        .get("/v2/myorg/mypackage/manifests/latest")
        .add_header("X-Forwarded-For", "203.0.113.7")
        .await
        .assert_status_ok();

    let snapshot = setup.state.store.snapshot();
    assert_eq!(snapshot.packages.get("myorg/mypackage"), Some(&1));
    assert_eq!(snapshot.visitors.get("203.0.113.7"), Some(&1));
    assert_eq!(snapshot.downloads.len(), 1);
    assert_eq!(snapshot.downloads[0].package, "myorg/mypackage");
    assert_eq!(snapshot.downloads[0].client_partial_id, "203.0.11****");
}

#[tokio::test]
async fn test_base_endpoint_relays_challenge_and_counts_visit_only() {
    let upstream = spawn_upstream().await;
    let setup = create_test_server(proxy_config(&upstream), None);

    let response = setup
        .server
        .get("/v2/")
        .add_header("X-Forwarded-For", "198.51.100.4")
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    assert!(response
        .header("www-authenticate")
        .to_str()
        .unwrap()
        .starts_with("Bearer realm="));
    assert_eq!(
        response.header("docker-distribution-api-version"),
        "registry/2.0"
    );

    let snapshot = setup.state.store.snapshot();
    assert_eq!(snapshot.total_requests(), 1);
    assert_eq!(snapshot.total_downloads(), 0);
    assert!(snapshot.downloads.is_empty());
}

#[tokio::test]
async fn test_redirect_is_relayed_not_followed() {
    let upstream = spawn_upstream().await;
    let setup = create_test_server(proxy_config(&upstream), None);

    let response = setup.server.get("/v2/acme/app/blobs/redirect").await;

    response.assert_status(StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.header("location"), BLOB_LOCATION);
    assert_eq!(setup.state.store.snapshot().packages.get("acme/app"), Some(&1));
}

#[tokio::test]
async fn test_query_string_is_preserved() {
    let upstream = spawn_upstream().await;
    let setup = create_test_server(proxy_config(&upstream), None);

    let response = setup
        .server
        .get("/v2/acme/app/tags/list")
        .add_query_param("n", "10")
        .add_query_param("last", "v1.2")
        .await;

    response.assert_status_ok();
    let echoed: Value = response.json();
    assert_eq!(echoed["query"], "n=10&last=v1.2");
}

#[tokio::test]
async fn test_methods_pass_through() {
    let upstream = spawn_upstream().await;
    let setup = create_test_server(proxy_config(&upstream), None);

    let put: Value = setup
        .server
        .put("/v2/acme/app/manifests/v1")
        .text("{}")
        .await
        .json();
    assert_eq!(put["method"], "PUT");

    let delete: Value = setup
        .server
        .delete("/v2/acme/app/manifests/sha256:abc")
        .await
        .json();
    assert_eq!(delete["method"], "DELETE");

    let patch: Value = setup
        .server
        .patch("/v2/acme/app/blobs/uploads/1234")
        .text("chunk")
        .await
        .json();
    assert_eq!(patch["method"], "PATCH");
    assert_eq!(patch["body"], "chunk");
}

#[tokio::test]
async fn test_unresponsive_upstream_yields_proxy_error() {
    let upstream = spawn_upstream().await;
    let setup = create_test_server(proxy_config(&upstream), None);

    let started = Instant::now();
    let response = setup
        .server
        .get("/v2/slow/app/manifests/latest")
        .expect_failure()
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.text().starts_with("Proxy error:"));
    assert!(started.elapsed() < Duration::from_secs(3));

    // The request was still counted before forwarding.
    assert_eq!(setup.state.store.snapshot().packages.get("slow/app"), Some(&1));
}

#[tokio::test]
async fn test_unreachable_upstream_yields_proxy_error() {
    // Nothing listens on the discard port locally.
    let mut config = registry_proxy::Config::default();
    config.upstream.base_url = Some("http://127.0.0.1:9/v2/".to_string());
    config.upstream.timeout_secs = 2;
    let setup = create_test_server(config, None);

    let response = setup.server.get("/v2/acme/app/tags/list").expect_failure().await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.text().starts_with("Proxy error:"));
}
