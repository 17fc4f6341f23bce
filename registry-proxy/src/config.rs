//! # Configuration Management
//!
//! Runtime configuration for the proxy, loaded from an optional JSON file.
//! Every section falls back to defaults, so an empty object (or no file at
//! all) yields a working proxy in front of `ghcr.io` with reporting disabled
//! until SMTP sender and recipients are filled in.
//!
//! ```json
//! {
//!   "server": { "host": "0.0.0.0", "port": 8000 },
//!   "upstream": { "registry_host": "ghcr.io", "timeout_secs": 30 },
//!   "report": { "enabled": true, "daily_at": "09:00" },
//!   "smtp": {
//!     "server": "smtp.gmail.com",
//!     "port": 587,
//!     "sender_email": "proxy@example.com",
//!     "recipient_emails": ["ops@example.com"]
//!   }
//! }
//! ```
//!
//! The SMTP password may be supplied through `REGISTRY_PROXY_SMTP_PASSWORD`
//! instead of the file.

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::NaiveTime;
use lettre::message::Mailbox;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable that overrides `smtp.sender_password`
pub const SMTP_PASSWORD_ENV: &str = "REGISTRY_PROXY_SMTP_PASSWORD";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamSettings,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Upstream registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    /// Registry host; requests go to `https://<registry_host>/v2/`
    pub registry_host: String,
    /// Full base URL overriding `registry_host` (e.g. a plain-HTTP registry)
    pub base_url: Option<String>,
    /// Connect/response/idle-read timeout in seconds
    pub timeout_secs: u64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            registry_host: "ghcr.io".to_string(),
            base_url: None,
            timeout_secs: 30,
        }
    }
}

impl UpstreamSettings {
    /// Base URL of the registry v2 API, always ending in `/`.
    pub fn base_url(&self) -> String {
        let base = match &self.base_url {
            Some(url) => url.clone(),
            None => format!("https://{}/v2/", self.registry_host),
        };
        if base.ends_with('/') {
            base
        } else {
            format!("{base}/")
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Analytics retention and presentation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Download events retained in memory (oldest dropped first)
    pub max_download_events: usize,
    /// Rows per section on the `/analytics` dashboard
    pub dashboard_items: usize,
    /// Rows per section in the emailed report
    pub report_items: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            max_download_events: 10_000,
            dashboard_items: 10,
            report_items: 5,
        }
    }
}

/// Daily report schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub enabled: bool,
    /// Local wall-clock trigger time, `HH:MM`
    pub daily_at: String,
    pub poll_interval_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_at: "09:00".to_string(),
            poll_interval_secs: 60,
        }
    }
}

impl ReportConfig {
    pub fn trigger_time(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(self.daily_at.trim(), "%H:%M").map_err(|e| {
            ConfigError::Invalid(format!(
                "report.daily_at must be HH:MM, got '{}': {e}",
                self.daily_at
            ))
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Mail transport settings for report delivery.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub sender_email: String,
    pub sender_password: String,
    pub recipient_emails: Vec<String>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: "smtp.gmail.com".to_string(),
            port: 587,
            sender_email: String::new(),
            sender_password: String::new(),
            recipient_emails: Vec::new(),
        }
    }
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("sender_email", &self.sender_email)
            .field("sender_password", &"<redacted>")
            .field("recipient_emails", &self.recipient_emails)
            .finish()
    }
}

impl SmtpConfig {
    /// Whether there is someone to send from and someone to send to
    pub fn is_configured(&self) -> bool {
        !self.sender_email.trim().is_empty() && !self.recipient_emails.is_empty()
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration if the file exists, otherwise use defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply environment overrides on top of file values.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(password) = lookup(SMTP_PASSWORD_ENV).filter(|p| !p.is_empty()) {
            self.smtp.sender_password = password;
        }
        self
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must not be 0".into()));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "upstream.timeout_secs must be greater than 0".into(),
            ));
        }
        if self.upstream.base_url.is_none() && self.upstream.registry_host.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "upstream.registry_host must not be empty".into(),
            ));
        }
        if self.analytics.max_download_events == 0 {
            return Err(ConfigError::Invalid(
                "analytics.max_download_events must be greater than 0".into(),
            ));
        }
        if self.report.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "report.poll_interval_secs must be greater than 0".into(),
            ));
        }
        self.report.trigger_time()?;

        let sender = self.smtp.sender_email.trim();
        let addresses = std::iter::once(sender)
            .filter(|s| !s.is_empty())
            .chain(self.smtp.recipient_emails.iter().map(|r| r.trim()));
        for address in addresses {
            address.parse::<Mailbox>().map_err(|e| {
                ConfigError::Invalid(format!("invalid mail address '{address}': {e}"))
            })?;
        }

        Ok(())
    }
}
