//! `hireflow-core`: shared building blocks for the email pipeline.
//!
//! This crate contains **pure** primitives (no infrastructure concerns):
//! strongly-typed identifiers, the domain error model and value objects.

pub mod error;
pub mod id;
pub mod value_object;

pub use error::{DomainError, DomainResult};
pub use id::{ClientId, InboxId, OutboxId, TemplateId, WorkerId};
pub use value_object::{EmailAddress, ValueObject};
