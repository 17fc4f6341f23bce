//! Type definitions for analytics data and endpoint payloads

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Suffix appended to the visible prefix of a redacted client identifier
pub const CLIENT_ID_MASK: &str = "****";

/// Number of leading characters of a client identifier kept after redaction
pub const CLIENT_ID_VISIBLE_CHARS: usize = 8;

/// Obscure a client identifier for storage and display.
///
/// Keeps the first eight characters and appends a fixed mask, so
/// `203.0.113.7` becomes `203.0.11****`.
pub fn redact_client_id(client_id: &str) -> String {
    let visible: String = client_id.chars().take(CLIENT_ID_VISIBLE_CHARS).collect();
    format!("{visible}{CLIENT_ID_MASK}")
}

/// One recorded blob or manifest fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadEvent {
    /// Package key, `<namespace>/<name>`
    pub package: String,
    /// When the request arrived
    pub timestamp: DateTime<Utc>,
    /// Redacted client identifier
    pub client_partial_id: String,
}

/// A package and how often it was downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageCount {
    pub package: String,
    pub downloads: u64,
}

/// Point-in-time copy of the analytics state.
///
/// Owns all of its data; nothing here is shared with the live store.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSnapshot {
    /// Requests per client identifier
    pub visitors: HashMap<String, u64>,
    /// Downloads per package key
    pub packages: HashMap<String, u64>,
    /// Retained download events, oldest first
    pub downloads: Vec<DownloadEvent>,
    /// When the store was created
    pub start_time: DateTime<Utc>,
    /// When this snapshot was taken
    pub taken_at: DateTime<Utc>,
}

impl AnalyticsSnapshot {
    /// Number of distinct client identifiers seen
    pub fn unique_visitors(&self) -> usize {
        self.visitors.len()
    }

    /// Total number of proxied requests
    pub fn total_requests(&self) -> u64 {
        self.visitors.values().sum()
    }

    /// Total package downloads, including events no longer retained
    pub fn total_downloads(&self) -> u64 {
        self.packages.values().sum()
    }

    /// Most downloaded packages, highest first; ties ordered by name.
    pub fn top_packages(&self, limit: usize) -> Vec<PackageCount> {
        let mut counts: Vec<PackageCount> = self
            .packages
            .iter()
            .map(|(package, &downloads)| PackageCount {
                package: package.clone(),
                downloads,
            })
            .collect();
        counts.sort_by(|a, b| {
            b.downloads
                .cmp(&a.downloads)
                .then_with(|| a.package.cmp(&b.package))
        });
        counts.truncate(limit);
        counts
    }

    /// The newest `limit` download events, newest first.
    pub fn recent_downloads(&self, limit: usize) -> Vec<&DownloadEvent> {
        self.downloads.iter().rev().take(limit).collect()
    }

    /// Seconds between store creation and this snapshot
    pub fn uptime_seconds(&self) -> u64 {
        (self.taken_at - self.start_time).num_seconds().max(0) as u64
    }
}

/// `/health` response body
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: String,
}

/// `/send-report` response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ReportSentResponse {
    pub status: String,
    pub recipients: usize,
    pub timestamp: String,
}
