//! Persistence for the email pipeline.
//!
//! Every store is an async trait with an in-memory implementation (tests,
//! local development) and a Postgres implementation in [`postgres`].
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (check constraint) | `23514` | `Invalid` |
//! | Database (other) | any other | `Storage` |
//! | PoolClosed / other | N/A | `Storage` |

pub mod clients;
pub mod inbox;
pub mod outbox;
pub mod postgres;
pub mod templates;

pub use clients::{ClientDirectory, ClientRecord, InMemoryClientDirectory};
pub use inbox::{InMemoryInboxStore, InboxFilter, InboxStore};
pub use outbox::{InMemoryOutboxStore, OutboxFilter, OutboxStats, OutboxStore};
pub use templates::{InMemoryTemplateStore, TemplateStore};

use hireflow_core::DomainError;

/// Store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    /// The row is no longer `sending` under this worker's claim.
    #[error("claim lost for {0}")]
    ClaimLost(String),
    #[error("invalid data: {0}")]
    Invalid(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<DomainError> for StoreError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound => StoreError::NotFound(err.to_string()),
            DomainError::Conflict(msg) => StoreError::Conflict(msg),
            other => StoreError::Invalid(other.to_string()),
        }
    }
}

/// Map SQLx errors to StoreError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23514") => StoreError::Invalid(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::ColumnDecode { index, source } => StoreError::Invalid(format!(
            "failed to decode column {} in {}: {}",
            index, operation, source
        )),
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Clamp a caller-supplied page size.
pub(crate) fn clamp_limit(limit: Option<usize>, default: usize, max: usize) -> usize {
    limit.unwrap_or(default).clamp(1, max)
}
