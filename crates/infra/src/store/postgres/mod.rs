//! Postgres implementations of the stores.
//!
//! The expected tables are described in `sql/schema.sql` at the crate root;
//! applying it is left to the deployment.

mod clients;
mod inbox;
mod outbox;
mod templates;

pub use clients::PostgresClientDirectory;
pub use inbox::PostgresInboxStore;
pub use outbox::PostgresOutboxStore;
pub use templates::PostgresTemplateStore;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use super::{map_sqlx_error, StoreError};

/// Reference DDL for the tables used by this module.
pub const SCHEMA_SQL: &str = include_str!("../../../sql/schema.sql");

/// Open a connection pool.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))?;

    info!(max_connections, "connected to postgres");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::SCHEMA_SQL;

    #[test]
    fn schema_declares_every_store_table() {
        for table in ["clients", "email_templates", "email_queue", "email_inbox"] {
            assert!(
                SCHEMA_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                "missing table {table}"
            );
        }
    }
}
