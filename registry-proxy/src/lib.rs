//! # Registry Proxy
//!
//! A transparent reverse proxy for the Docker Registry HTTP API v2 that
//! records who pulls what on the way through.
//!
//! ## Features
//!
//! - **Transparent relay**: every `/v2/` request goes to the upstream registry
//!   (GitHub Container Registry by default) and the answer comes back untouched,
//!   auth challenges and blob redirects included
//! - **Pull analytics**: in-memory visitor, package and download counters
//! - **Dashboard**: an HTML summary at `/analytics`
//! - **Daily report**: the same summary emailed over SMTP at a fixed local time,
//!   or on demand through `/send-report`
//!
//! ## Key Modules
//!
//! - [`config`]: Configuration file and environment overrides
//! - [`stats`]: The shared statistics store
//! - [`upstream`]: Communication with the upstream registry
//! - [`proxy`]: The `/v2/` relay handler
//! - [`report`]: Dashboard and email rendering
//! - [`mailer`]: SMTP delivery
//! - [`scheduler`]: Daily report trigger
//! - [`server`]: Routing and server lifecycle

pub mod config;
pub mod error;
pub mod mailer;
pub mod proxy;
pub mod report;
pub mod scheduler;
pub mod server;
pub mod state;
pub mod stats;
pub mod types;
pub mod upstream;

// Re-export key types for convenience
pub use config::Config;
pub use error::{ApiErrorResponse, AppError, AppResult, ConfigError, ErrorCode, ReportError};
pub use mailer::{RenderedReport, ReportDelivery, SmtpDelivery};
pub use report::{ReportRenderer, Reporter};
pub use server::{build_router, run_server};
pub use state::AppState;
pub use stats::StatsStore;
pub use types::{AnalyticsSnapshot, DownloadEvent, PackageCount};
pub use upstream::{UpstreamClient, UpstreamConfig};

/// Default config file looked up by the CLI
pub const DEFAULT_CONFIG_FILE: &str = "registry-proxy.json";
