//! Report delivery over SMTP.
//!
//! [`ReportDelivery`] is the seam between the reporter and the outside
//! world; [`SmtpDelivery`] is the production implementation.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use crate::config::SmtpConfig;
use crate::error::ReportError;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// A rendered report ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReport {
    pub subject: String,
    pub html: String,
}

/// Something that can hand a report to its recipients.
#[async_trait]
pub trait ReportDelivery: Send + Sync {
    /// Deliver the report, returning how many recipients it was sent to.
    async fn deliver(&self, report: &RenderedReport) -> Result<usize, ReportError>;
}

fn parse_mailbox(address: &str) -> Result<Mailbox, ReportError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| ReportError::Address {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// Sends reports through an SMTP relay using STARTTLS.
pub struct SmtpDelivery {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl SmtpDelivery {
    /// Build a transport from configuration. No connection is made until the
    /// first delivery.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, ReportError> {
        if !config.is_configured() {
            return Err(ReportError::NotConfigured);
        }

        let from = parse_mailbox(&config.sender_email)?;
        let to = config
            .recipient_emails
            .iter()
            .map(|r| parse_mailbox(r))
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)
            .map_err(|e| ReportError::Delivery(format!("invalid SMTP relay: {e}")))?
            .port(config.port)
            .timeout(Some(SMTP_TIMEOUT));

        if !config.sender_password.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.sender_email.trim().to_string(),
                config.sender_password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }

    /// One HTML message addressed to every recipient.
    pub fn build_message(&self, report: &RenderedReport) -> Result<Message, ReportError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(report.subject.clone());
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }

        builder
            .multipart(
                MultiPart::alternative().singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(report.html.clone()),
                ),
            )
            .map_err(|e| ReportError::Message(e.to_string()))
    }
}

#[async_trait]
impl ReportDelivery for SmtpDelivery {
    async fn deliver(&self, report: &RenderedReport) -> Result<usize, ReportError> {
        let message = self.build_message(report)?;
        debug!(recipients = self.to.len(), "Sending report over SMTP");

        self.transport
            .send(message)
            .await
            .map_err(|e| ReportError::Delivery(e.to_string()))?;

        Ok(self.to.len())
    }
}
