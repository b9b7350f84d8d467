//! Postgres-backed client directory (`clients` table, read-only).

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use hireflow_core::{ClientId, EmailAddress};

use crate::store::clients::{ClientDirectory, ClientRecord};
use crate::store::{map_sqlx_error, StoreError};

#[derive(Debug, Clone)]
pub struct PostgresClientDirectory {
    pool: Arc<PgPool>,
}

impl PostgresClientDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl ClientDirectory for PostgresClientDirectory {
    #[instrument(skip(self), fields(email = %email), err)]
    async fn find_by_sender_email(&self, email: &EmailAddress) -> Result<Option<ClientRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, assigned_email, created_at
            FROM clients
            WHERE LOWER(assigned_email) = $1
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(email.normalized())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_client_by_email", e))?;

        row.as_ref().map(client_from_row).transpose()
    }

    #[instrument(skip(self), fields(client_id = %id), err)]
    async fn get(&self, id: ClientId) -> Result<Option<ClientRecord>, StoreError> {
        let row = sqlx::query("SELECT id, name, assigned_email, created_at FROM clients WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_client", e))?;

        row.as_ref().map(client_from_row).transpose()
    }
}

fn client_from_row(row: &sqlx::postgres::PgRow) -> Result<ClientRecord, StoreError> {
    let decode = |e| map_sqlx_error("decode_client", e);
    let id: uuid::Uuid = row.try_get("id").map_err(decode)?;
    let assigned: String = row.try_get("assigned_email").map_err(decode)?;

    Ok(ClientRecord {
        id: ClientId::from_uuid(id),
        name: row.try_get("name").map_err(decode)?,
        assigned_email: EmailAddress::parse(&assigned).map_err(StoreError::from)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}
