//! Value objects: equality by value, not identity.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// A syntactically valid email address (`local@domain`).
///
/// The domain part is normalized to lowercase; the local part is kept as given
/// (mailbox lookups compare case-insensitively via [`EmailAddress::eq_ignore_case`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress {
    value: String,
    at: usize,
}

impl ValueObject for EmailAddress {}

impl EmailAddress {
    pub fn parse(input: &str) -> Result<Self, DomainError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_email("empty address"));
        }
        if trimmed.len() > 254 {
            return Err(DomainError::invalid_email(format!("address too long: {trimmed}")));
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c == '<' || c == '>' || c == ',') {
            return Err(DomainError::invalid_email(trimmed.to_string()));
        }

        let at = trimmed
            .rfind('@')
            .ok_or_else(|| DomainError::invalid_email(trimmed.to_string()))?;
        let (local, domain) = (&trimmed[..at], &trimmed[at + 1..]);

        if local.is_empty() || local.contains('@') {
            return Err(DomainError::invalid_email(trimmed.to_string()));
        }
        if domain.is_empty()
            || domain.starts_with('.')
            || domain.ends_with('.')
            || domain.contains("..")
        {
            return Err(DomainError::invalid_email(trimmed.to_string()));
        }

        Ok(Self {
            value: format!("{local}@{}", domain.to_ascii_lowercase()),
            at,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn local_part(&self) -> &str {
        &self.value[..self.at]
    }

    pub fn domain(&self) -> &str {
        &self.value[self.at + 1..]
    }

    /// Exact (case-insensitive) domain match. Subdomains do not match.
    pub fn is_in_domain(&self, domain: &str) -> bool {
        self.domain().eq_ignore_ascii_case(domain.trim().trim_start_matches('@'))
    }

    pub fn eq_ignore_case(&self, other: &EmailAddress) -> bool {
        self.value.eq_ignore_ascii_case(&other.value)
    }

    /// Fully lowercased form, used as a lookup key.
    pub fn normalized(&self) -> String {
        self.value.to_ascii_lowercase()
    }
}

impl core::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.value)
    }
}

impl FromStr for EmailAddress {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EmailAddress> for String {
    fn from(value: EmailAddress) -> Self {
        value.value
    }
}
