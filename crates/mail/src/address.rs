//! Mailboxes (`Display Name <local@domain>`) and address lists.

use serde::{Deserialize, Serialize};

use hireflow_core::{DomainError, DomainResult, EmailAddress};

/// An address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    pub address: EmailAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Mailbox {
    pub fn new(address: EmailAddress, name: Option<String>) -> Self {
        let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        Self { address, name }
    }

    pub fn bare(address: EmailAddress) -> Self {
        Self { address, name: None }
    }

    /// Parse a single mailbox.
    ///
    /// Accepts `a@b.com`, `<a@b.com>`, `Name <a@b.com>` and `"Last, First" <a@b.com>`.
    pub fn parse(input: &str) -> DomainResult<Self> {
        let input = input.trim();
        match (input.rfind('<'), input.rfind('>')) {
            (Some(open), Some(close)) if open < close => {
                let address = EmailAddress::parse(&input[open + 1..close])?;
                let name = unquote(input[..open].trim());
                Ok(Self::new(address, Some(name)))
            }
            (None, None) => Ok(Self::bare(EmailAddress::parse(input)?)),
            _ => Err(DomainError::invalid_email(input.to_string())),
        }
    }
}

impl core::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.name {
            Some(name) if name.contains([',', '"', '<', '>', '@']) => {
                write!(f, "\"{}\" <{}>", name.replace('"', "'"), self.address)
            }
            Some(name) => write!(f, "{} <{}>", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

fn unquote(s: &str) -> String {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
        .trim()
        .to_string()
}

/// Parse a comma-separated address list, skipping entries that don't parse.
///
/// Commas inside double quotes or angle brackets do not split entries.
pub fn parse_address_list(input: &str) -> Vec<Mailbox> {
    split_list(input)
        .into_iter()
        .filter_map(|part| Mailbox::parse(part).ok())
        .collect()
}

fn split_list(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' | ';' if !in_quotes && !in_angle => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);

    parts.into_iter().map(str::trim).filter(|p| !p.is_empty()).collect()
}
