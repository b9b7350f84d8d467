//! Inbound email webhook: signature verification and inbox attribution.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, info, warn};

use hireflow_core::{ClientId, EmailAddress, InboxId};
use hireflow_mail::{InboundEmail, InboundError, InboundPayload, InboxEntry, NewInboxEntry, ThreadId};

use crate::clock::Clock;
use crate::store::{ClientDirectory, ClientRecord, InboxStore, StoreError};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";
const SIGNATURE_VERSION: &str = "v1";
const DEFAULT_TOLERANCE_SECONDS: i64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("missing webhook signature headers")]
    MissingSignature,

    #[error("invalid webhook timestamp")]
    InvalidTimestamp,

    #[error("webhook timestamp outside tolerance")]
    StaleTimestamp,

    #[error("webhook signature mismatch")]
    BadSignature,

    #[error(transparent)]
    Payload(#[from] InboundError),

    #[error("no client is assigned to {0}")]
    UnknownRecipient(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WebhookError {
    /// Rejections caused by the signature check.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            WebhookError::MissingSignature
                | WebhookError::InvalidTimestamp
                | WebhookError::StaleTimestamp
                | WebhookError::BadSignature
        )
    }
}

/// HMAC-SHA256 signature check over `"<timestamp>.<body>"`.
///
/// Without a secret every request is accepted.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Option<String>,
    tolerance: Duration,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("enabled", &self.is_enabled())
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl WebhookVerifier {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            tolerance: Duration::seconds(DEFAULT_TOLERANCE_SECONDS),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    fn mac(secret: &str, timestamp: &str, body: &[u8]) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        Some(mac)
    }

    /// Header value for `body` sent at `timestamp` (unix seconds).
    ///
    /// Returns `None` when no secret is configured.
    pub fn sign(&self, body: &[u8], timestamp: i64) -> Option<String> {
        let secret = self.secret.as_deref()?;
        let mac = Self::mac(secret, &timestamp.to_string(), body)?;
        Some(format!(
            "{SIGNATURE_VERSION}={}",
            hex::encode(mac.finalize().into_bytes())
        ))
    }

    pub fn verify(
        &self,
        body: &[u8],
        timestamp_header: Option<&str>,
        signature_header: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        let Some(secret) = self.secret.as_deref() else {
            return Ok(());
        };

        let (Some(timestamp), Some(signature)) = (timestamp_header, signature_header) else {
            return Err(WebhookError::MissingSignature);
        };

        let timestamp = timestamp.trim();
        let sent_at = timestamp
            .parse::<i64>()
            .ok()
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .ok_or(WebhookError::InvalidTimestamp)?;

        if (now - sent_at).abs() > self.tolerance {
            warn!(sent_at = %sent_at, "webhook timestamp outside tolerance");
            return Err(WebhookError::StaleTimestamp);
        }

        let expected = parse_signature_header(signature)
            .and_then(|hex_sig| hex::decode(hex_sig).ok())
            .ok_or(WebhookError::BadSignature)?;

        let mac = Self::mac(secret, timestamp, body).ok_or(WebhookError::BadSignature)?;
        mac.verify_slice(&expected)
            .map_err(|_| WebhookError::BadSignature)
    }
}

/// Extract the hex digest from `v1=<hex>`.
fn parse_signature_header(header: &str) -> Option<&str> {
    header
        .split(',')
        .filter_map(|part| part.trim().split_once('='))
        .find(|(version, _)| *version == SIGNATURE_VERSION)
        .map(|(_, sig)| sig)
}

/// Attributes parsed inbound mail to a client and stores it in the inbox.
pub struct InboundService<I, C> {
    inbox: I,
    clients: C,
    clock: Arc<dyn Clock>,
    owned_domain: String,
}

impl<I, C> InboundService<I, C>
where
    I: InboxStore,
    C: ClientDirectory,
{
    pub fn new(inbox: I, clients: C, clock: Arc<dyn Clock>, owned_domain: impl Into<String>) -> Self {
        Self {
            inbox,
            clients,
            clock,
            owned_domain: owned_domain.into().trim().to_ascii_lowercase(),
        }
    }

    pub fn owned_domain(&self) -> &str {
        &self.owned_domain
    }

    /// Parse, attribute and store one inbound email.
    pub async fn accept(&self, payload: &InboundPayload) -> Result<InboxEntry, WebhookError> {
        let email = payload.parse(&self.owned_domain).inspect_err(|e| {
            warn!(domain = %self.owned_domain, error = %e, "inbound email rejected");
        })?;

        let (client, recipient) = self.match_client(&email).await?;
        let thread_id = self.resolve_thread(client.id, &email).await?;

        let entry = NewInboxEntry {
            client_id: client.id,
            to_email: recipient,
            email,
            thread_id,
        }
        .into_entry(InboxId::new(), self.clock.now());

        let stored = self.inbox.insert(entry).await?;
        info!(
            inbox_id = %stored.id,
            client_id = %stored.client_id,
            from = %stored.from_email,
            thread_id = %stored.thread_id,
            "inbound email stored"
        );
        Ok(stored)
    }

    /// First owned-domain recipient with an assigned client wins.
    async fn match_client(&self, email: &InboundEmail) -> Result<(ClientRecord, EmailAddress), WebhookError> {
        for recipient in &email.owned_recipients {
            if let Some(client) = self.clients.find_by_sender_email(recipient).await? {
                return Ok((client, recipient.clone()));
            }
        }

        let recipients = email
            .owned_recipients
            .iter()
            .map(EmailAddress::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        warn!(recipients = %recipients, "no client assigned to inbound recipients");
        Err(WebhookError::UnknownRecipient(recipients))
    }

    async fn resolve_thread(&self, client_id: ClientId, email: &InboundEmail) -> Result<ThreadId, WebhookError> {
        for candidate in email.headers.parent_candidates() {
            if let Some(parent) = self.inbox.find_by_message_id(client_id, candidate).await? {
                debug!(parent = %parent.id, thread_id = %parent.thread_id, "reply joined existing thread");
                return Ok(parent.thread_id);
            }
        }
        Ok(ThreadId::derive(client_id, &email.headers, &email.subject))
    }
}
