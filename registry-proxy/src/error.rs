//! # Error Types
//!
//! Every fallible component returns its own typed error so callers match on
//! the failure explicitly:
//!
//! - [`UpstreamError`]: the registry could not be reached (timeout, connection
//!   failure). The proxy handler turns it into a `500` with a short body.
//! - [`ReportError`]: a report could not be rendered or delivered. The
//!   scheduler logs it; `/send-report` returns it as JSON.
//! - [`ConfigError`]: configuration could not be loaded or is invalid.
//! - [`AppError`]: HTTP-facing error for the operational endpoints, rendered
//!   in a consistent JSON shape:
//!
//! ```json
//! {
//!   "error": "Human-readable error message",
//!   "code": "machine_readable_error_code",
//!   "details": null,
//!   "timestamp": "2024-01-01T12:00:00Z"
//! }
//! ```

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

/// Failure to obtain a response from the upstream registry.
///
/// This never represents an upstream *status code*: 4xx/5xx answers from the
/// registry are relayed to the client unchanged.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("upstream transport failure: {0}")]
    Transport(String),

    #[error("request could not be forwarded: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            UpstreamError::InvalidRequest(err.to_string())
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

/// Failure to render or deliver an analytics report.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("report delivery is not configured (sender and recipients required)")]
    NotConfigured,

    #[error("failed to render report: {0}")]
    Render(#[from] tera::Error),

    #[error("invalid mail address '{address}': {reason}")]
    Address { address: String, reason: String },

    #[error("failed to build report message: {0}")]
    Message(String),

    #[error("failed to deliver report: {0}")]
    Delivery(String),
}

/// Failure to load or validate configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Standardized error body returned by the operational endpoints.
#[derive(Serialize, Debug)]
pub struct ApiErrorResponse {
    pub error: String,
    pub code: String,
    pub details: Option<Value>,
    pub timestamp: String,
}

/// Machine-readable error classification
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorCode {
    ReportError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ReportError => "report_error",
            ErrorCode::InternalError => "internal_error",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::ReportError => StatusCode::BAD_GATEWAY,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors surfaced by the operational HTTP endpoints.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Delivery-side report failure; the mail relay or its settings are at fault.
    #[error(transparent)]
    Report(ReportError),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

// Template rendering failures are internal; the rest come from delivery.
impl From<ReportError> for AppError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::Render(e) => {
                AppError::InternalError(format!("failed to render page: {e}"))
            }
            other => AppError::Report(other),
        }
    }
}

impl AppError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AppError::Report(_) => ErrorCode::ReportError,
            AppError::InternalError(_) => ErrorCode::InternalError,
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            AppError::Report(ReportError::Address { address, .. }) => {
                Some(json!({ "address": address }))
            }
            _ => None,
        }
    }

    pub fn to_error_response(&self) -> ApiErrorResponse {
        ApiErrorResponse {
            error: self.to_string(),
            code: self.error_code().as_str().to_string(),
            details: self.details(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "Request failed");

        let status = self.error_code().http_status();
        let body = self.to_error_response();

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
