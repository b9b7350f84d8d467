//! Email pipeline domain module.
//!
//! Deterministic domain logic for the store-and-forward email pipeline
//! (no IO, no HTTP, no storage):
//!
//! - `outbox`: queued outbound email and its delivery state machine
//! - `inbox`: received email attributed to a client
//! - `inbound`: parsing of provider webhook payloads
//! - `thread`: conversation thread keys
//! - `template`: `{{variable}}` templates and rendering
//! - `text`: HTML entity decoding and HTML-to-text fallback

pub mod address;
pub mod inbound;
pub mod inbox;
pub mod outbox;
pub mod template;
pub mod text;
pub mod thread;

pub use address::{parse_address_list, Mailbox};
pub use inbound::{InboundEmail, InboundError, InboundPayload, MessageHeaders};
pub use inbox::{InboxEntry, NewInboxEntry};
pub use outbox::{
    BackoffStrategy, DeliveryFailure, FailureClass, FailureOutcome, NewOutboxEntry, OutboxEntry,
    OutboxStatus, Priority, RetryPolicy, MAX_RETRIES_LIMIT,
};
pub use template::{
    placeholders, render, variables_from_json, MissingVariable, NewTemplate, RenderedTemplate,
    Template, TemplatePatch, Variables,
};
pub use thread::{normalize_subject, ThreadId};
