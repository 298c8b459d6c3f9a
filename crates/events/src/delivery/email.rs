//! Audit notification delivery via SMTP.
//!
//! [`EmailNotifier`] wraps the `lettre` async SMTP transport to send
//! plain-text audit notifications. Configuration is loaded from environment
//! variables; if `SMTP_HOST` or `AUDIT_NOTIFY_EMAIL` is not set,
//! [`EmailConfig::from_env`] returns `None` and no mailer should be
//! constructed.

use ark_core::error::StoreError;
use ark_core::notification::Notification;
use ark_core::ports::{Notifier, StoreResult};
use async_trait::async_trait;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for email delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),
}

// ---------------------------------------------------------------------------
// EmailConfig
// ---------------------------------------------------------------------------

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

/// Default sender address when `SMTP_FROM` is not set.
const DEFAULT_FROM_ADDRESS: &str = "preservation@archive.local";

/// Prefix for every subject line.
const SUBJECT_PREFIX: &str = "[Preservation]";

/// Configuration for the SMTP notifier.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// SMTP server hostname.
    pub smtp_host: String,
    /// SMTP server port (defaults to 587).
    pub smtp_port: u16,
    /// RFC 5322 "From" address.
    pub from_address: String,
    /// Optional SMTP username.
    pub smtp_user: Option<String>,
    /// Optional SMTP password.
    pub smtp_password: Option<String>,
    /// Operator mailbox that receives audit notifications.
    pub recipient: String,
}

impl EmailConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `SMTP_HOST` or `AUDIT_NOTIFY_EMAIL` is not set,
    /// signalling that audit notifications go to the log instead.
    ///
    /// | Variable             | Required | Default                      |
    /// |----------------------|----------|------------------------------|
    /// | `SMTP_HOST`          | yes      |                              |
    /// | `AUDIT_NOTIFY_EMAIL` | yes      |                              |
    /// | `SMTP_PORT`          | no       | `587`                        |
    /// | `SMTP_FROM`          | no       | `preservation@archive.local` |
    /// | `SMTP_USER`          | no       |                              |
    /// | `SMTP_PASSWORD`      | no       |                              |
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("SMTP_HOST").ok()?;
        let recipient = std::env::var("AUDIT_NOTIFY_EMAIL").ok()?;
        Some(Self {
            smtp_host,
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            from_address: std::env::var("SMTP_FROM")
                .unwrap_or_else(|_| DEFAULT_FROM_ADDRESS.to_string()),
            smtp_user: std::env::var("SMTP_USER").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
            recipient,
        })
    }
}

// ---------------------------------------------------------------------------
// EmailNotifier
// ---------------------------------------------------------------------------

/// Sends audit notifications to the operator mailbox via SMTP.
pub struct EmailNotifier {
    config: EmailConfig,
}

impl EmailNotifier {
    /// Create a notifier with the given configuration.
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Assemble the MIME message for a notification.
    pub fn build_message(&self, notification: &Notification) -> Result<lettre::Message, EmailError> {
        use lettre::message::header::ContentType;

        lettre::Message::builder()
            .from(self.config.from_address.parse()?)
            .to(self.config.recipient.parse()?)
            .subject(format!("{SUBJECT_PREFIX} {}", notification.subject))
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body.clone())
            .map_err(|e| EmailError::Build(e.to_string()))
    }

    /// Send one notification email to the configured recipient.
    pub async fn deliver(&self, notification: &Notification) -> Result<(), EmailError> {
        use lettre::{
            transport::smtp::authentication::Credentials, AsyncSmtpTransport, AsyncTransport,
            Tokio1Executor,
        };

        let email = self.build_message(notification)?;

        let mut transport_builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)?
                .port(self.config.smtp_port);

        if let (Some(user), Some(pass)) = (&self.config.smtp_user, &self.config.smtp_password) {
            transport_builder =
                transport_builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let mailer = transport_builder.build();
        mailer.send(email).await?;

        tracing::info!(to = %self.config.recipient, subject = %notification.subject, "Notification email sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, notification: &Notification) -> StoreResult<()> {
        self.deliver(notification).await.map_err(|e| {
            tracing::error!(error = %e, subject = %notification.subject, "Failed to send notification email");
            StoreError::backend(e)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
