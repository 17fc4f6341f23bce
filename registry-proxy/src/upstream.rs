//! # Upstream Client
//!
//! Relays one request to the backing registry and hands back its response
//! untouched: status, headers and a streaming body. Redirects are returned
//! to the caller instead of being followed, because registry clients rely on
//! raw 3xx answers to reach blob storage.
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use axum::body::Body;
//! use axum::http::{HeaderMap, Method};
//! use registry_proxy::upstream::{UpstreamClient, UpstreamConfig};
//!
//! let client = UpstreamClient::new(UpstreamConfig::default())?;
//! let response = client
//!     .forward(Method::GET, "", &HeaderMap::new(), None, Body::empty())
//!     .await?;
//! println!("registry answered {}", response.status);
//! # Ok(())
//! # }
//! ```

use std::io;
use std::time::Duration;

use axum::body::{Body, Bytes, HttpBody};
use axum::http::{header, HeaderMap, Method, StatusCode};
use futures_util::{stream, Stream, StreamExt};
use reqwest::{redirect, Client};
use tokio::sync::watch;
use tracing::debug;

use crate::config::UpstreamSettings;
use crate::error::UpstreamError;

/// Connection settings for the upstream registry.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the v2 API, ending in `/`
    pub base_url: String,
    /// Longest stretch without progress: connecting, a pause in the request
    /// body, the wait for response headers after the last request chunk, or
    /// a pause in the response body. Transfers that keep moving are never
    /// cut off.
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self::from(&UpstreamSettings::default())
    }
}

impl From<&UpstreamSettings> for UpstreamConfig {
    fn from(settings: &UpstreamSettings) -> Self {
        Self {
            base_url: settings.base_url(),
            timeout: settings.timeout(),
        }
    }
}

/// A registry response ready to relay.
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

/// HTTP client for the upstream registry.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    /// Build a client with redirects disabled and the configured connect
    /// timeout. Idle limits are applied per exchange in [`forward`](Self::forward).
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| {
                UpstreamError::InvalidRequest(format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Full upstream URL for a registry path and raw query string.
    pub fn target_url(&self, path: &str, query: Option<&str>) -> String {
        match query {
            Some(q) if !q.is_empty() => format!("{}{}?{}", self.config.base_url, path, q),
            _ => format!("{}{}", self.config.base_url, path),
        }
    }

    /// Forward a request to the registry.
    ///
    /// `path` is appended verbatim to the base URL. Every header except
    /// `Host` is copied. The body is streamed to the registry as-is; a body
    /// that is already known to be empty is not sent at all.
    ///
    /// The exchange fails with [`UpstreamError::Timeout`] only after
    /// `timeout` passes with neither a request chunk going out nor the
    /// response arriving.
    pub async fn forward(
        &self,
        method: Method,
        path: &str,
        headers: &HeaderMap,
        query: Option<&str>,
        body: Body,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let url = self.target_url(path, query);
        let timeout = self.config.timeout;
        debug!(method = %method, url = %url, "Forwarding to upstream registry");

        let mut outbound = headers.clone();
        outbound.remove(header::HOST);

        let (progress_tx, mut progress) = watch::channel(());
        let mut request = self.client.request(method, &url).headers(outbound);
        if !body.is_end_stream() {
            let upload = body.into_data_stream().inspect(move |_| {
                progress_tx.send_replace(());
            });
            request = request.body(reqwest::Body::wrap_stream(upload));
        }

        let send = request.send();
        tokio::pin!(send);

        let sent = loop {
            tokio::select! {
                result = &mut send => break result,
                progressed = tokio::time::timeout(timeout, progress.changed()) => match progressed {
                    Ok(Ok(())) => continue,
                    // Upload finished and its stream was dropped.
                    Ok(Err(_)) => {
                        break tokio::time::timeout(timeout, &mut send)
                            .await
                            .map_err(|_| UpstreamError::Timeout(timeout))?;
                    }
                    Err(_) => return Err(UpstreamError::Timeout(timeout)),
                },
            }
        };

        let response = sent.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(timeout)
            } else {
                UpstreamError::from(e)
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        debug!(status = %status, url = %url, "Upstream responded");

        Ok(UpstreamResponse {
            status,
            headers,
            body: Body::from_stream(idle_limited(response.bytes_stream(), timeout)),
        })
    }
}

/// End a response stream with an error once it stalls for longer than `idle`.
fn idle_limited<S>(
    body: S,
    idle: Duration,
) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    stream::unfold(Some(Box::pin(body)), move |state| async move {
        let mut body = state?;
        match tokio::time::timeout(idle, body.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(body))),
            Ok(Some(Err(e))) => Some((Err(io::Error::other(e)), None)),
            Ok(None) => None,
            Err(_) => Some((
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("upstream body stalled for {idle:?}"),
                )),
                None,
            )),
        }
    })
}
