//! Parsing of inbound-parse webhook payloads.
//!
//! The provider posts a multipart form with (at least) `from`, `to`,
//! `subject`, `text`, `html`, an `envelope` JSON document and the raw
//! `headers` block. This module turns those fields into an [`InboundEmail`]
//! addressed to the owned domain; client attribution happens in the
//! infrastructure layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use hireflow_core::EmailAddress;

use crate::address::{parse_address_list, Mailbox};
use crate::text::{decode_html_entities, html_to_text};

/// Inbound payload rejection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InboundError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid sender: {0}")]
    InvalidSender(String),

    #[error("no recipients in payload")]
    NoRecipients,

    #[error("no recipient in owned domain {domain} (got: {recipients})")]
    ForeignRecipients { domain: String, recipients: String },
}

/// Raw form fields as posted by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundPayload {
    pub from: Option<String>,
    pub to: Option<String>,
    pub cc: Option<String>,
    pub subject: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub envelope: Option<String>,
    pub headers: Option<String>,
}

impl InboundPayload {
    /// Assign a named form field. Unknown fields are ignored.
    pub fn set_field(&mut self, name: &str, value: String) {
        let slot = match name {
            "from" => &mut self.from,
            "to" => &mut self.to,
            "cc" => &mut self.cc,
            "subject" => &mut self.subject,
            "text" => &mut self.text,
            "html" => &mut self.html,
            "envelope" => &mut self.envelope,
            "headers" => &mut self.headers,
            _ => return,
        };
        *slot = Some(value);
    }

    /// Recipients from the SMTP envelope when available, else from the `to` header.
    pub fn recipient_list(&self) -> Vec<EmailAddress> {
        let from_envelope = self
            .envelope
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Envelope>(raw).ok())
            .map(|env| {
                env.to
                    .iter()
                    .filter_map(|a| EmailAddress::parse(a).ok())
                    .collect::<Vec<_>>()
            })
            .filter(|list| !list.is_empty());

        let list = from_envelope.unwrap_or_else(|| {
            self.to
                .as_deref()
                .map(parse_address_list)
                .unwrap_or_default()
                .into_iter()
                .map(|m| m.address)
                .collect()
        });

        dedup_ignore_case(list)
    }

    fn sender(&self) -> Result<Mailbox, InboundError> {
        if let Some(from) = self.from.as_deref().filter(|f| !f.trim().is_empty()) {
            return Mailbox::parse(from).map_err(|_| InboundError::InvalidSender(from.to_string()));
        }

        let envelope_from = self
            .envelope
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Envelope>(raw).ok())
            .and_then(|env| env.from)
            .ok_or(InboundError::MissingField("from"))?;

        EmailAddress::parse(&envelope_from)
            .map(Mailbox::bare)
            .map_err(|_| InboundError::InvalidSender(envelope_from))
    }

    /// Validate the payload and keep only owned-domain recipients.
    pub fn parse(&self, owned_domain: &str) -> Result<InboundEmail, InboundError> {
        let from = self.sender()?;

        let recipients = self.recipient_list();
        if recipients.is_empty() {
            return Err(InboundError::NoRecipients);
        }

        let owned: Vec<EmailAddress> = recipients
            .iter()
            .filter(|r| r.is_in_domain(owned_domain))
            .cloned()
            .collect();
        if owned.is_empty() {
            return Err(InboundError::ForeignRecipients {
                domain: owned_domain.to_string(),
                recipients: recipients
                    .iter()
                    .map(EmailAddress::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        let subject = self
            .subject
            .as_deref()
            .map(|s| decode_html_entities(s.trim()))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "(no subject)".to_string());

        let html_body = self.html.clone().filter(|h| !h.trim().is_empty());
        let text_body = match self.text.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(text) => decode_html_entities(text),
            None => html_body.as_deref().map(html_to_text).unwrap_or_default(),
        };

        let headers = self
            .headers
            .as_deref()
            .map(MessageHeaders::parse)
            .unwrap_or_default();

        Ok(InboundEmail {
            from,
            owned_recipients: owned,
            subject,
            text_body,
            html_body,
            headers,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    to: Vec<String>,
    #[serde(default)]
    from: Option<String>,
}

fn dedup_ignore_case(list: Vec<EmailAddress>) -> Vec<EmailAddress> {
    let mut out: Vec<EmailAddress> = Vec::with_capacity(list.len());
    for addr in list {
        if !out.iter().any(|seen| seen.eq_ignore_case(&addr)) {
            out.push(addr);
        }
    }
    out
}

/// Reply-chain headers extracted from the raw header block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeaders {
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
}

impl MessageHeaders {
    /// Parse an RFC 5322 header block (folded lines allowed).
    pub fn parse(raw: &str) -> Self {
        let mut headers = Self::default();

        for (name, value) in unfold(raw) {
            match name.to_ascii_lowercase().as_str() {
                "message-id" => headers.message_id = msg_ids(&value).into_iter().next(),
                "in-reply-to" => headers.in_reply_to = msg_ids(&value).into_iter().next(),
                "references" => headers.references = msg_ids(&value),
                _ => {}
            }
        }

        headers
    }

    /// First message of the reply chain, if the headers describe one.
    pub fn root_message_id(&self) -> Option<&str> {
        self.references
            .first()
            .or(self.in_reply_to.as_ref())
            .map(String::as_str)
    }

    /// Ids that may already be stored, closest parent first.
    pub fn parent_candidates(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        if let Some(parent) = self.in_reply_to.as_deref() {
            out.push(parent);
        }
        for r in self.references.iter().rev() {
            if !out.contains(&r.as_str()) {
                out.push(r);
            }
        }
        out
    }
}

fn unfold(raw: &str) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for line in raw.lines() {
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = out.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            out.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    out
}

/// Extract `<id>` tokens; a bare token is accepted when no brackets are present.
fn msg_ids(value: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let mut rest = value;
    while let Some(open) = rest.find('<') {
        let Some(close) = rest[open..].find('>') else { break };
        let id = rest[open + 1..open + close].trim();
        if !id.is_empty() {
            ids.push(id.to_string());
        }
        rest = &rest[open + close + 1..];
    }
    if ids.is_empty() {
        let bare = value.trim();
        if !bare.is_empty() && !bare.contains(char::is_whitespace) {
            ids.push(bare.to_string());
        }
    }
    ids
}

/// A validated inbound message addressed to the owned domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEmail {
    pub from: Mailbox,
    /// Owned-domain recipients in payload order.
    pub owned_recipients: Vec<EmailAddress>,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
    pub headers: MessageHeaders,
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN: &str = "inbox.hireflow.test";

    fn payload() -> InboundPayload {
        InboundPayload {
            from: Some("Recruiter <jobs@acme.com>".into()),
            to: Some("jane@inbox.hireflow.test".into()),
            subject: Some("Interview &amp; next steps".into()),
            text: Some("Hi Jane".into()),
            ..Default::default()
        }
    }

    #[test]
    fn parses_minimal_payload() {
        let email = payload().parse(DOMAIN).unwrap();
        assert_eq!(email.from.address.as_str(), "jobs@acme.com");
        assert_eq!(email.from.name.as_deref(), Some("Recruiter"));
        assert_eq!(email.subject, "Interview & next steps");
        assert_eq!(email.text_body, "Hi Jane");
        assert_eq!(email.owned_recipients.len(), 1);
    }

    #[test]
    fn envelope_takes_precedence_over_to_header() {
        let mut p = payload();
        p.to = Some("someone@elsewhere.com".into());
        p.envelope = Some(r#"{"to":["bob@inbox.hireflow.test","BOB@inbox.hireflow.test"],"from":"jobs@acme.com"}"#.into());
        let email = p.parse(DOMAIN).unwrap();
        let rcpts: Vec<_> = email.owned_recipients.iter().map(|r| r.as_str()).collect();
        assert_eq!(rcpts, vec!["bob@inbox.hireflow.test"]);
    }

    #[test]
    fn malformed_envelope_falls_back_to_header() {
        let mut p = payload();
        p.envelope = Some("not json".into());
        assert_eq!(p.recipient_list()[0].as_str(), "jane@inbox.hireflow.test");
    }

    #[test]
    fn rejects_foreign_recipients() {
        let mut p = payload();
        p.to = Some("jane@hireflow.test, jane@evil.inbox.hireflow.test".into());
        match p.parse(DOMAIN) {
            Err(InboundError::ForeignRecipients { domain, recipients }) => {
                assert_eq!(domain, DOMAIN);
                assert!(recipients.contains("jane@hireflow.test"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn keeps_only_owned_recipients_in_order() {
        let mut p = payload();
        p.to = Some("a@other.com, Second <b@inbox.hireflow.test>, c@INBOX.hireflow.test".into());
        let email = p.parse(DOMAIN).unwrap();
        let rcpts: Vec<_> = email.owned_recipients.iter().map(|r| r.as_str()).collect();
        assert_eq!(rcpts, vec!["b@inbox.hireflow.test", "c@inbox.hireflow.test"]);
    }

    #[test]
    fn sender_required() {
        let mut p = payload();
        p.from = None;
        assert_eq!(p.parse(DOMAIN), Err(InboundError::MissingField("from")));

        p.envelope = Some(r#"{"to":["x@inbox.hireflow.test"],"from":"bounce@acme.com"}"#.into());
        assert_eq!(p.parse(DOMAIN).unwrap().from.address.as_str(), "bounce@acme.com");

        p.from = Some("garbage".into());
        assert!(matches!(p.parse(DOMAIN), Err(InboundError::InvalidSender(_))));
    }

    #[test]
    fn missing_recipients() {
        let mut p = payload();
        p.to = None;
        assert_eq!(p.parse(DOMAIN), Err(InboundError::NoRecipients));
    }

    #[test]
    fn text_falls_back_to_html() {
        let mut p = payload();
        p.text = None;
        p.html = Some("<p>Offer &amp; contract</p>".into());
        let email = p.parse(DOMAIN).unwrap();
        assert_eq!(email.text_body, "Offer & contract");
        assert!(email.html_body.is_some());
    }

    #[test]
    fn blank_subject_gets_placeholder() {
        let mut p = payload();
        p.subject = Some("   ".into());
        assert_eq!(p.parse(DOMAIN).unwrap().subject, "(no subject)");
    }

    #[test]
    fn parses_folded_reply_headers() {
        let raw = "Received: from mx\r\nMessage-ID: <c@mail.acme.com>\r\n\
                   In-Reply-To: <b@mail.acme.com>\r\n\
                   References: <a@mail.acme.com>\r\n\t<b@mail.acme.com>\r\nSubject: Re: hi\r\n";
        let h = MessageHeaders::parse(raw);
        assert_eq!(h.message_id.as_deref(), Some("c@mail.acme.com"));
        assert_eq!(h.in_reply_to.as_deref(), Some("b@mail.acme.com"));
        assert_eq!(h.references, vec!["a@mail.acme.com", "b@mail.acme.com"]);
        assert_eq!(h.root_message_id(), Some("a@mail.acme.com"));
        assert_eq!(h.parent_candidates(), vec!["b@mail.acme.com", "a@mail.acme.com"]);
    }

    #[test]
    fn set_field_ignores_unknown_names() {
        let mut p = InboundPayload::default();
        p.set_field("subject", "x".into());
        p.set_field("attachment1", "binary".into());
        assert_eq!(p.subject.as_deref(), Some("x"));
    }
}
