//! HTTP server setup and operational route handlers
//!
//! Wires the registry relay under `/v2/` together with the analytics
//! dashboard, manual report trigger, health probe and landing page, and
//! starts the daily report scheduler next to the listener.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap},
    response::{Html, Json},
    routing::{any, get},
    Router,
};
use chrono::Utc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::proxy::proxy_registry;
use crate::scheduler::ReportScheduler;
use crate::state::AppState;
use crate::types::{HealthResponse, ReportSentResponse};

/// Build the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let registry = Router::new()
        .route("/v2/", any(proxy_registry))
        .route("/v2/{*path}", any(proxy_registry))
        .layer(DefaultBodyLimit::disable());

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/analytics", get(analytics_handler))
        .route("/send-report", get(send_report_handler))
        .merge(registry)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the daily scheduler when reporting is enabled and deliverable.
pub fn start_scheduler(
    state: &AppState,
    shutdown: watch::Receiver<bool>,
) -> Result<Option<tokio::task::JoinHandle<()>>> {
    let report = &state.config.report;
    if !report.enabled {
        info!("Daily reports disabled");
        return Ok(None);
    }
    if !state.reporter.is_configured() {
        warn!("Daily reports enabled but SMTP sender/recipients are not configured");
        return Ok(None);
    }

    let trigger = report.trigger_time()?;
    info!(daily_at = %trigger, "Daily reports scheduled");
    Ok(Some(
        ReportScheduler::new(state.reporter.clone(), trigger, report.poll_interval())
            .spawn(shutdown),
    ))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal, stopping registry proxy");
}

/// Bind the listener; `host` may be an IP address or a resolvable name.
pub async fn bind_listener(host: &str, port: u16) -> Result<TcpListener> {
    TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind to {host}:{port}"))
}

/// Run the proxy until interrupted.
pub async fn run_server(config: Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let host = config.server.host.clone();
    let port = config.server.port;

    let state = Arc::new(AppState::build(config).context("Failed to initialize proxy")?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = start_scheduler(&state, shutdown_rx)?;

    let listener = bind_listener(&host, port).await?;
    let addr = listener.local_addr().context("Failed to read bound address")?;

    info!(
        addr = %addr,
        upstream = %state.upstream.config().base_url,
        "Registry proxy listening"
    );

    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            warn!(error = %e, "Report scheduler did not stop cleanly");
        }
    }

    Ok(())
}

async fn index_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Html<String>> {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    let page = state.renderer.render_home(host)?;
    Ok(Html(page))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let now = Utc::now();
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: (now - state.store.start_time()).num_seconds().max(0) as u64,
        timestamp: now.to_rfc3339(),
    })
}

async fn analytics_handler(State(state): State<Arc<AppState>>) -> AppResult<Html<String>> {
    let snapshot = state.store.snapshot();
    let page = state
        .renderer
        .render_dashboard(&snapshot, state.config.analytics.dashboard_items)?;
    Ok(Html(page))
}

async fn send_report_handler(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ReportSentResponse>> {
    let recipients = state.reporter.send_report().await.map_err(AppError::from)?;
    Ok(Json(ReportSentResponse {
        status: "sent".to_string(),
        recipients,
        timestamp: Utc::now().to_rfc3339(),
    }))
}
