//! # Stats Store
//!
//! In-memory analytics shared by every request handler and the report
//! scheduler. Visitor counts, package counts and the download log sit behind
//! one mutex so a snapshot always sees all three at the same instant.
//!
//! ```rust
//! use chrono::Utc;
//! use registry_proxy::stats::StatsStore;
//!
//! let store = StatsStore::new(100);
//! store.record_request("myorg/app/manifests/latest", "203.0.113.7", Utc::now());
//!
//! let snapshot = store.snapshot();
//! assert_eq!(snapshot.total_requests(), 1);
//! assert_eq!(snapshot.packages["myorg/app"], 1);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::types::{redact_client_id, AnalyticsSnapshot, DownloadEvent};

/// Path fragments that mark a request as a package download
const DOWNLOAD_MARKERS: [&str; 2] = ["/blobs/", "/manifests/"];

/// Derive the package key for a download request path.
///
/// Returns `None` when the path is not a blob/manifest fetch or has fewer
/// than two segments.
pub fn download_package(path: &str) -> Option<String> {
    if !DOWNLOAD_MARKERS.iter().any(|marker| path.contains(marker)) {
        return None;
    }

    let mut segments = path.split('/');
    match (segments.next(), segments.next()) {
        (Some(namespace), Some(name)) => Some(format!("{namespace}/{name}")),
        _ => None,
    }
}

#[derive(Debug)]
struct StatsInner {
    visitors: HashMap<String, u64>,
    packages: HashMap<String, u64>,
    downloads: VecDeque<DownloadEvent>,
    max_events: usize,
}

impl StatsInner {
    fn record_visit(&mut self, client_id: &str) {
        match self.visitors.get_mut(client_id) {
            Some(count) => *count += 1,
            None => {
                self.visitors.insert(client_id.to_string(), 1);
            }
        }
    }

    fn record_download(
        &mut self,
        path: &str,
        client_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<String> {
        let package = download_package(path)?;

        *self.packages.entry(package.clone()).or_insert(0) += 1;

        if self.downloads.len() >= self.max_events {
            self.downloads.pop_front();
        }
        self.downloads.push_back(DownloadEvent {
            package: package.clone(),
            timestamp,
            client_partial_id: redact_client_id(client_id),
        });

        Some(package)
    }
}

/// Shared, thread-safe analytics aggregate.
///
/// Cloning yields another handle to the same store.
#[derive(Debug, Clone)]
pub struct StatsStore {
    inner: Arc<Mutex<StatsInner>>,
    start_time: DateTime<Utc>,
}

impl StatsStore {
    /// Create an empty store that retains at most `max_events` download
    /// events (oldest dropped first). A cap of zero is treated as one.
    pub fn new(max_events: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StatsInner {
                visitors: HashMap::new(),
                packages: HashMap::new(),
                downloads: VecDeque::new(),
                max_events: max_events.max(1),
            })),
            start_time: Utc::now(),
        }
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    // Every critical section leaves the maps consistent, so a poisoned lock
    // still guards valid data.
    fn lock(&self) -> MutexGuard<'_, StatsInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count one request from `client_id`.
    pub fn record_visit(&self, client_id: &str) {
        self.lock().record_visit(client_id);
    }

    /// Record a package download if `path` is a blob or manifest fetch.
    ///
    /// Returns the package key when a download was recorded.
    pub fn record_download_if_applicable(
        &self,
        path: &str,
        client_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<String> {
        self.lock().record_download(path, client_id, timestamp)
    }

    /// Record the visit and any download for one proxied request under a
    /// single lock acquisition.
    pub fn record_request(
        &self,
        path: &str,
        client_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<String> {
        let mut inner = self.lock();
        inner.record_visit(client_id);
        inner.record_download(path, client_id, timestamp)
    }

    /// Copy the current state.
    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let inner = self.lock();
        AnalyticsSnapshot {
            visitors: inner.visitors.clone(),
            packages: inner.packages.clone(),
            downloads: inner.downloads.iter().cloned().collect(),
            start_time: self.start_time,
            taken_at: Utc::now(),
        }
    }
}
