pub mod templates;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("delivery to {to} rejected: {reason}")]
    Rejected { to: String, reason: String },

    #[error("delivery to {to} timed out")]
    Timeout { to: String },
}

/// Outbound email transport. Implementations should fail fast; callers wrap
/// every send in their own timeout as well.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), MailError>;
}

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), MailError> {
        info!(to, subject, bytes = html_body.len(), "mail sent (log transport)");
        Ok(())
    }
}
