//! Registry v2 request relay.
//!
//! Every request under `/v2/` is counted in the [`StatsStore`](crate::stats::StatsStore)
//! and then forwarded unchanged to the upstream registry. The registry's
//! answer, including auth challenges and redirects, goes back to the client
//! as-is. Only a transport failure produces a local response.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::{error, info};

use crate::state::AppState;
use crate::upstream::UpstreamResponse;

/// Header carrying the original client address when behind another proxy
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Characters of the user agent kept in the request log line
const USER_AGENT_LOG_CHARS: usize = 50;

/// Registry path relative to `/v2/`, exactly as it appeared on the wire.
pub fn registry_path(uri_path: &str) -> &str {
    uri_path.strip_prefix("/v2/").unwrap_or(uri_path)
}

/// Identify the caller: the forwarded-for header when present, otherwise the
/// peer address.
pub fn client_identifier(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("Unknown")
        .chars()
        .take(USER_AGENT_LOG_CHARS)
        .collect()
}

fn relay(upstream: UpstreamResponse) -> Response {
    let mut response = Response::new(upstream.body);
    *response.status_mut() = upstream.status;
    *response.headers_mut() = upstream.headers;
    response
}

/// Handler for `/v2/` and `/v2/{*path}`, any method.
pub async fn proxy_registry(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let path = registry_path(parts.uri.path());
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_id = client_identifier(&parts.headers, peer);

    let package = state.store.record_request(path, &client_id, Utc::now());
    info!(
        client = %client_id,
        user_agent = %user_agent(&parts.headers),
        method = %parts.method,
        path = %format!("/{path}"),
        package = package.as_deref().unwrap_or("-"),
        "Registry request"
    );

    match state
        .upstream
        .forward(
            parts.method.clone(),
            path,
            &parts.headers,
            parts.uri.query(),
            body,
        )
        .await
    {
        Ok(upstream) => relay(upstream),
        Err(e) => {
            error!(error = %e, path = %format!("/{path}"), "Proxy error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                format!("Proxy error: {e}"),
            )
                .into_response()
        }
    }
}
