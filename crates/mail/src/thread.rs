//! Conversation thread keys.
//!
//! A thread id is `thr_` + the first 16 hex chars of SHA-256 over a seed.
//! Seeds are either the root message-id of a reply chain or the client id
//! combined with the normalized subject.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use hireflow_core::ClientId;

use crate::inbound::MessageHeaders;
use crate::text::collapse_whitespace;

/// Identifier grouping inbox entries of one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Stable key for a reply chain rooted at `message_id`.
    pub fn for_root_message(message_id: &str) -> Self {
        Self::from_seed(&format!("msg:{}", message_id.trim()))
    }

    /// Stable key for mail without usable reply headers.
    pub fn for_subject(client_id: ClientId, subject: &str) -> Self {
        Self::from_seed(&format!("subj:{}:{}", client_id, normalize_subject(subject)))
    }

    /// Key derived from the reply headers when present, otherwise from the subject.
    pub fn derive(client_id: ClientId, headers: &MessageHeaders, subject: &str) -> Self {
        match headers.root_message_id() {
            Some(root) => Self::for_root_message(root),
            None => Self::for_subject(client_id, subject),
        }
    }

    fn from_seed(seed: &str) -> Self {
        let digest = Sha256::digest(seed.as_bytes());
        let hex = hex::encode(digest);
        Self(format!("thr_{}", &hex[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

const REPLY_PREFIXES: &[&str] = &["re", "fwd", "fw", "aw", "sv", "wg"];

/// Strip leading reply/forward markers (`Re:`, `Fwd:`, `RE[2]:` …), collapse
/// whitespace and lowercase.
pub fn normalize_subject(subject: &str) -> String {
    let mut rest = subject.trim();

    loop {
        let Some(colon) = rest.find(':') else { break };
        let marker = rest[..colon].trim();
        let base = marker
            .split_once('[')
            .filter(|(_, counter)| counter.ends_with(']'))
            .map_or(marker, |(base, _)| base);

        if REPLY_PREFIXES.iter().any(|p| base.eq_ignore_ascii_case(p)) {
            rest = rest[colon + 1..].trim_start();
        } else {
            break;
        }
    }

    collapse_whitespace(rest).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_reply_markers() {
        assert_eq!(normalize_subject("Re: RE: Fwd:  Interview   Offer"), "interview offer");
        assert_eq!(normalize_subject("RE[2]: Payment received"), "payment received");
        assert_eq!(normalize_subject("AW: Termin"), "termin");
        assert_eq!(normalize_subject("Meeting: Tuesday"), "meeting: tuesday");
        assert_eq!(normalize_subject("Re:"), "");
    }

    #[test]
    fn subject_keys_are_stable_and_client_scoped() {
        let client = ClientId::new();
        let a = ThreadId::for_subject(client, "Interview offer");
        let b = ThreadId::for_subject(client, "RE: interview   OFFER");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("thr_"));
        assert_eq!(a.as_str().len(), 20);

        let other = ThreadId::for_subject(ClientId::new(), "Interview offer");
        assert_ne!(a, other);
    }

    #[test]
    fn derive_prefers_root_message() {
        let client = ClientId::new();
        let headers = MessageHeaders {
            message_id: Some("c@mail".into()),
            in_reply_to: Some("b@mail".into()),
            references: vec!["a@mail".into(), "b@mail".into()],
        };
        assert_eq!(
            ThreadId::derive(client, &headers, "whatever"),
            ThreadId::for_root_message("a@mail")
        );

        let bare = MessageHeaders::default();
        assert_eq!(
            ThreadId::derive(client, &bare, "Hello"),
            ThreadId::for_subject(client, "hello")
        );
    }
}
