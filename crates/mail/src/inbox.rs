//! Received mail attributed to a client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hireflow_core::{ClientId, EmailAddress, InboxId};

use crate::inbound::InboundEmail;
use crate::thread::ThreadId;

/// A message stored in a client's inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxEntry {
    pub id: InboxId,
    pub client_id: ClientId,
    pub from_email: EmailAddress,
    pub from_name: Option<String>,
    pub to_email: EmailAddress,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
    pub thread_id: ThreadId,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InboxEntry {
    pub fn set_read(&mut self, read: bool) {
        self.is_read = read;
    }

    /// First non-empty line of the text body, truncated for list views.
    pub fn snippet(&self, max_chars: usize) -> String {
        let line = self
            .text_body
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default();
        if line.chars().count() <= max_chars {
            return line.to_string();
        }
        let mut out: String = line.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}

/// Insert request produced by the inbound pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInboxEntry {
    pub client_id: ClientId,
    pub to_email: EmailAddress,
    pub email: InboundEmail,
    pub thread_id: ThreadId,
}

impl NewInboxEntry {
    pub fn into_entry(self, id: InboxId, now: DateTime<Utc>) -> InboxEntry {
        let InboundEmail {
            from,
            subject,
            text_body,
            html_body,
            headers,
            ..
        } = self.email;

        InboxEntry {
            id,
            client_id: self.client_id,
            from_email: from.address,
            from_name: from.name,
            to_email: self.to_email,
            subject,
            text_body,
            html_body,
            received_at: now,
            is_read: false,
            thread_id: self.thread_id,
            message_id: headers.message_id,
            in_reply_to: headers.in_reply_to,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbound::InboundPayload;

    fn new_entry(text: &str) -> NewInboxEntry {
        let payload = InboundPayload {
            from: Some("Acme HR <hr@acme.com>".into()),
            to: Some("jane@in.hireflow.test".into()),
            subject: Some("Offer".into()),
            text: Some(text.into()),
            headers: Some("Message-ID: <m1@acme.com>\nIn-Reply-To: <m0@acme.com>\n".into()),
            ..Default::default()
        };
        let email = payload.parse("in.hireflow.test").unwrap();
        let client_id = ClientId::new();
        NewInboxEntry {
            client_id,
            to_email: email.owned_recipients[0].clone(),
            thread_id: ThreadId::derive(client_id, &email.headers, &email.subject),
            email,
        }
    }

    #[test]
    fn into_entry_copies_headers_and_starts_unread() {
        let now = Utc::now();
        let entry = new_entry("Hello").into_entry(InboxId::new(), now);
        assert_eq!(entry.from_email.as_str(), "hr@acme.com");
        assert_eq!(entry.from_name.as_deref(), Some("Acme HR"));
        assert_eq!(entry.message_id.as_deref(), Some("m1@acme.com"));
        assert_eq!(entry.in_reply_to.as_deref(), Some("m0@acme.com"));
        assert_eq!(entry.thread_id, ThreadId::for_root_message("m0@acme.com"));
        assert!(!entry.is_read);
        assert_eq!(entry.received_at, now);
    }

    #[test]
    fn snippet_uses_first_line() {
        let entry = new_entry("\n  Dear Jane, we are pleased\nsecond line").into_entry(InboxId::new(), Utc::now());
        assert_eq!(entry.snippet(100), "Dear Jane, we are pleased");
        assert_eq!(entry.snippet(4), "Dear…");
    }
}
