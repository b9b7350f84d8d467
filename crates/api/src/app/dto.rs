use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hireflow_infra::store::OutboxStats;
use hireflow_infra::ProcessorStats;
use hireflow_mail::{InboxEntry, MissingVariable, Template};

use crate::app::errors::ApiError;

// -------------------------
// Request DTOs
// -------------------------

/// Queue an email with literal content or from a template.
///
/// `template` is a template id or name; `category` picks that category's
/// default template. Explicit `subject`/`html`/`text` override the rendered parts.
#[derive(Debug, Default, Deserialize)]
pub struct EnqueueRequest {
    pub to: String,
    pub to_name: Option<String>,
    pub from: Option<String>,
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
    pub subject: Option<String>,
    pub html: Option<String>,
    pub text: Option<String>,
    pub template: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub variables: Option<serde_json::Value>,
    pub priority: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_retries: Option<u32>,
    pub client_id: Option<Uuid>,
}

impl EnqueueRequest {
    pub fn uses_template(&self) -> bool {
        self.template.is_some() || self.category.is_some()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct QueueListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InboxListQuery {
    pub client_id: Option<Uuid>,
    #[serde(default)]
    pub unread: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SetReadRequest {
    pub is_read: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct TemplateListQuery {
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PreviewRequest {
    #[serde(default)]
    pub variables: Option<serde_json::Value>,
    #[serde(default)]
    pub missing: MissingVariable,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub count: usize,
}

impl<T> From<Vec<T>> for Page<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QueueStatsResponse {
    #[serde(flatten)]
    pub counts: OutboxStats,
    pub total: u64,
    pub processor: ProcessorStats,
}

/// Inbox list row (body trimmed to a snippet).
#[derive(Debug, Serialize)]
pub struct InboxSummary {
    pub id: String,
    pub client_id: String,
    pub from_email: String,
    pub from_name: Option<String>,
    pub subject: String,
    pub snippet: String,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
    pub thread_id: String,
}

impl From<&InboxEntry> for InboxSummary {
    fn from(entry: &InboxEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            client_id: entry.client_id.to_string(),
            from_email: entry.from_email.to_string(),
            from_name: entry.from_name.clone(),
            subject: entry.subject.clone(),
            snippet: entry.snippet(160),
            received_at: entry.received_at,
            is_read: entry.is_read,
            thread_id: entry.thread_id.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InboxPage {
    pub items: Vec<InboxSummary>,
    pub count: usize,
    pub unread: u64,
}

#[derive(Debug, Serialize)]
pub struct ThreadResponse {
    pub thread_id: String,
    pub messages: Vec<InboxEntry>,
}

#[derive(Debug, Serialize)]
pub struct InboundAccepted {
    pub id: String,
    pub client_id: String,
    pub thread_id: String,
}

#[derive(Debug, Serialize)]
pub struct TemplatePreview {
    pub template_id: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    pub unresolved: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TemplateDetail {
    #[serde(flatten)]
    pub template: Template,
    pub placeholders: Vec<String>,
}

impl From<Template> for TemplateDetail {
    fn from(template: Template) -> Self {
        Self {
            placeholders: template.used_placeholders(),
            template,
        }
    }
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn parse_id<T>(what: &str, raw: &str) -> Result<T, ApiError>
where
    T: std::str::FromStr,
{
    raw.parse()
        .map_err(|_| ApiError::Validation(format!("invalid {what} id: {raw}")))
}
