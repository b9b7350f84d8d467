//! SMTP relay transport (feature `smtp`).

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox as LettreMailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use hireflow_mail::{Mailbox, OutboxEntry};

use super::{DeliveryReceipt, EmailTransport, TransportError};
use crate::config::SmtpConfig;

pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl std::fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpTransport").finish_non_exhaustive()
    }
}

impl SmtpTransport {
    pub fn new(config: &SmtpConfig) -> Result<Self, TransportError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| TransportError::Permanent(format!("invalid smtp relay {}: {e}", config.host)))?
            .port(config.port);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
        })
    }
}

fn to_lettre(mailbox: &Mailbox) -> Result<LettreMailbox, TransportError> {
    let address = mailbox
        .address
        .as_str()
        .parse()
        .map_err(|e| TransportError::Permanent(format!("invalid address {}: {e}", mailbox.address)))?;
    Ok(LettreMailbox::new(mailbox.name.clone(), address))
}

fn build_message(entry: &OutboxEntry) -> Result<Message, TransportError> {
    let mut builder = Message::builder()
        .from(to_lettre(&entry.from)?)
        .to(to_lettre(&entry.to)?)
        .subject(entry.subject.clone());

    if let Some(reply_to) = &entry.reply_to {
        builder = builder.reply_to(to_lettre(&Mailbox::bare(reply_to.clone()))?);
    }

    let built = match (entry.text_body.clone(), entry.html_body.clone()) {
        (Some(text), Some(html)) => builder.multipart(MultiPart::alternative_plain_html(text, html)),
        (None, Some(html)) => builder.singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_HTML)
                .body(html),
        ),
        (Some(text), None) => builder.singlepart(SinglePart::plain(text)),
        (None, None) => builder.singlepart(SinglePart::plain(String::new())),
    };

    built.map_err(|e| TransportError::Permanent(format!("failed to build message: {e}")))
}

#[async_trait]
impl EmailTransport for SmtpTransport {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, entry: &OutboxEntry) -> Result<DeliveryReceipt, TransportError> {
        let message = build_message(entry)?;

        let response = self.mailer.send(message).await.map_err(|e| {
            if e.is_permanent() {
                TransportError::Permanent(e.to_string())
            } else {
                TransportError::Transient(e.to_string())
            }
        })?;

        debug!(outbox_id = %entry.id, code = %response.code(), "smtp relay accepted email");
        Ok(DeliveryReceipt {
            provider_message_id: response.message().next().map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hireflow_core::OutboxId;
    use hireflow_mail::{NewOutboxEntry, RetryPolicy};

    #[test]
    fn builds_alternative_message() {
        let entry = NewOutboxEntry::new(
            Mailbox::parse("\"Doe, Jane\" <jane@example.com>").unwrap(),
            Mailbox::parse("team@hireflow.test").unwrap(),
            "Offer",
        )
        .with_html("<p>Hi</p>")
        .with_text("Hi")
        .into_entry(OutboxId::new(), &RetryPolicy::default(), Utc::now())
        .unwrap();

        let message = build_message(&entry).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Offer"));
        assert!(raw.contains("multipart/alternative"));
    }
}
