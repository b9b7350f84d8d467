//! Delivery transports.
//!
//! A transport hands one outbox row to an external system and classifies
//! failures as transient (retry later) or permanent.

mod http;
mod recording;
#[cfg(feature = "smtp")]
mod smtp;

pub use http::{HttpApiConfig, HttpApiTransport};
pub use recording::{RecordingTransport, SentMessage};
#[cfg(feature = "smtp")]
pub use smtp::SmtpTransport;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use hireflow_mail::{DeliveryFailure, OutboxEntry};

/// Transport error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("permanent: {0}")]
    Permanent(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

impl From<TransportError> for DeliveryFailure {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Transient(msg) => DeliveryFailure::transient(msg),
            TransportError::Permanent(msg) => DeliveryFailure::permanent(msg),
        }
    }
}

/// Provider acknowledgement of an accepted message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub provider_message_id: Option<String>,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn send(&self, entry: &OutboxEntry) -> Result<DeliveryReceipt, TransportError>;
}

#[async_trait]
impl<T: EmailTransport + ?Sized> EmailTransport for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn send(&self, entry: &OutboxEntry) -> Result<DeliveryReceipt, TransportError> {
        (**self).send(entry).await
    }
}

/// Accepts everything and logs it. Local development default.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl EmailTransport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, entry: &OutboxEntry) -> Result<DeliveryReceipt, TransportError> {
        info!(
            outbox_id = %entry.id,
            to = %entry.to,
            subject = %entry.subject,
            "email accepted by log transport"
        );
        Ok(DeliveryReceipt::default())
    }
}
