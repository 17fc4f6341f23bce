//! Shared application state handed to every request handler.
//!
//! Built once at startup by [`AppState::build`] and wrapped in an `Arc`.
//! The [`StatsStore`] inside is the only shared mutable data; everything else
//! is read-only after construction.

use std::sync::Arc;

use crate::config::Config;
use crate::error::{ReportError, UpstreamError};
use crate::mailer::{ReportDelivery, SmtpDelivery};
use crate::report::{ReportRenderer, Reporter};
use crate::stats::StatsStore;
use crate::upstream::{UpstreamClient, UpstreamConfig};

/// Startup failures while assembling the state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Report(#[from] ReportError),
}

#[derive(Clone)]
pub struct AppState {
    /// Analytics shared with the scheduler
    pub store: StatsStore,
    /// Client for the backing registry
    pub upstream: Arc<UpstreamClient>,
    /// Page and email rendering
    pub renderer: Arc<ReportRenderer>,
    /// Report delivery, used by `/send-report` and the scheduler
    pub reporter: Arc<Reporter>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Assemble state from configuration, using SMTP delivery when the
    /// configuration names a sender and recipients.
    pub fn build(config: Config) -> Result<Self, StateError> {
        let delivery: Option<Arc<dyn ReportDelivery>> = if config.smtp.is_configured() {
            Some(Arc::new(SmtpDelivery::from_config(&config.smtp)?))
        } else {
            None
        };
        Self::with_delivery(config, delivery)
    }

    /// Assemble state with an explicit delivery backend.
    pub fn with_delivery(
        config: Config,
        delivery: Option<Arc<dyn ReportDelivery>>,
    ) -> Result<Self, StateError> {
        let upstream_config = UpstreamConfig::from(&config.upstream);
        let renderer = Arc::new(ReportRenderer::new(upstream_config.base_url.clone())?);
        let upstream = Arc::new(UpstreamClient::new(upstream_config)?);
        let store = StatsStore::new(config.analytics.max_download_events);
        let reporter = Arc::new(Reporter::new(
            store.clone(),
            renderer.clone(),
            delivery,
            config.analytics.report_items,
        ));

        Ok(Self {
            store,
            upstream,
            renderer,
            reporter,
            config: Arc::new(config),
        })
    }
}
