//! # Reporting
//!
//! Turns [`AnalyticsSnapshot`]s into HTML, either the `/analytics` dashboard
//! or the daily email, and hands emails to a [`ReportDelivery`].

use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tera::{Context, Tera};
use tracing::info;

use crate::error::ReportError;
use crate::mailer::{RenderedReport, ReportDelivery};
use crate::stats::StatsStore;
use crate::types::{AnalyticsSnapshot, PackageCount};

pub const REPORT_TITLE: &str = "Registry Proxy Analytics";

const DASHBOARD_TEMPLATE: &str = "dashboard.html";
const EMAIL_TEMPLATE: &str = "report_email.html";
const HOME_TEMPLATE: &str = "home.html";

const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Serialize)]
struct DownloadRow {
    timestamp: String,
    package: String,
    client: String,
}

fn local_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format(DISPLAY_TIME_FORMAT).to_string()
}

/// Human-readable duration, e.g. `2d 3h 4m` or `42s`
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3600;
    let minutes = (seconds % 3600) / 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {}s", seconds % 60)
    } else {
        format!("{seconds}s")
    }
}

/// Renders analytics pages from embedded templates.
pub struct ReportRenderer {
    tera: Tera,
    upstream: String,
}

impl ReportRenderer {
    /// `upstream` is shown in rendered pages to name the proxied registry.
    pub fn new(upstream: impl Into<String>) -> Result<Self, ReportError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            (
                DASHBOARD_TEMPLATE,
                include_str!("../templates/dashboard.html"),
            ),
            (EMAIL_TEMPLATE, include_str!("../templates/report_email.html")),
            (HOME_TEMPLATE, include_str!("../templates/home.html")),
        ])?;

        Ok(Self {
            tera,
            upstream: upstream.into(),
        })
    }

    fn summary_context(&self, snapshot: &AnalyticsSnapshot, limit: usize) -> Context {
        let top_packages: Vec<PackageCount> = snapshot.top_packages(limit);
        let recent_downloads: Vec<DownloadRow> = snapshot
            .recent_downloads(limit)
            .into_iter()
            .map(|event| DownloadRow {
                timestamp: local_time(event.timestamp),
                package: event.package.clone(),
                client: event.client_partial_id.clone(),
            })
            .collect();

        let mut context = Context::new();
        context.insert("title", REPORT_TITLE);
        context.insert("upstream", &self.upstream);
        context.insert("unique_visitors", &snapshot.unique_visitors());
        context.insert("total_requests", &snapshot.total_requests());
        context.insert("total_downloads", &snapshot.total_downloads());
        context.insert("top_packages", &top_packages);
        context.insert("recent_downloads", &recent_downloads);
        context
    }

    /// The `/analytics` page.
    pub fn render_dashboard(
        &self,
        snapshot: &AnalyticsSnapshot,
        limit: usize,
    ) -> Result<String, ReportError> {
        let mut context = self.summary_context(snapshot, limit);
        context.insert("started", &local_time(snapshot.start_time));
        context.insert("uptime", &format_uptime(snapshot.uptime_seconds()));
        Ok(self.tera.render(DASHBOARD_TEMPLATE, &context)?)
    }

    /// The daily email, dated `generated`.
    pub fn render_email(
        &self,
        snapshot: &AnalyticsSnapshot,
        generated: DateTime<Local>,
        limit: usize,
    ) -> Result<RenderedReport, ReportError> {
        let mut context = self.summary_context(snapshot, limit);
        context.insert("generated", &generated.format(DISPLAY_TIME_FORMAT).to_string());

        Ok(RenderedReport {
            subject: format!(
                "{REPORT_TITLE} Report - {}",
                generated.format("%Y-%m-%d")
            ),
            html: self.tera.render(EMAIL_TEMPLATE, &context)?,
        })
    }

    /// The landing page; `host` is the address clients pull through.
    pub fn render_home(&self, host: &str) -> Result<String, ReportError> {
        let mut context = Context::new();
        context.insert("host", host);
        context.insert("upstream", &self.upstream);
        Ok(self.tera.render(HOME_TEMPLATE, &context)?)
    }
}

/// Snapshots the store, renders the email and delivers it.
pub struct Reporter {
    store: StatsStore,
    renderer: Arc<ReportRenderer>,
    delivery: Option<Arc<dyn ReportDelivery>>,
    items: usize,
}

impl Reporter {
    pub fn new(
        store: StatsStore,
        renderer: Arc<ReportRenderer>,
        delivery: Option<Arc<dyn ReportDelivery>>,
        items: usize,
    ) -> Self {
        Self {
            store,
            renderer,
            delivery,
            items,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.delivery.is_some()
    }

    /// Send a report of the current statistics.
    ///
    /// Returns the number of recipients on success.
    pub async fn send_report(&self) -> Result<usize, ReportError> {
        let delivery = self.delivery.as_ref().ok_or(ReportError::NotConfigured)?;

        let snapshot = self.store.snapshot();
        let report = self
            .renderer
            .render_email(&snapshot, Local::now(), self.items)?;
        let recipients = delivery.deliver(&report).await?;

        info!(
            recipients,
            requests = snapshot.total_requests(),
            downloads = snapshot.total_downloads(),
            "Analytics report sent"
        );
        Ok(recipients)
    }
}
