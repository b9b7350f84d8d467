//! Postgres-backed inbox (`email_inbox` table).

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use hireflow_core::{ClientId, EmailAddress, InboxId};
use hireflow_mail::{InboxEntry, ThreadId};

use crate::store::inbox::{InboxFilter, InboxStore};
use crate::store::{clamp_limit, map_sqlx_error, StoreError};

#[derive(Debug, Clone)]
pub struct PostgresInboxStore {
    pool: Arc<PgPool>,
}

impl PostgresInboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl InboxStore for PostgresInboxStore {
    #[instrument(skip(self, entry), fields(inbox_id = %entry.id, client_id = %entry.client_id), err)]
    async fn insert(&self, entry: InboxEntry) -> Result<InboxEntry, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO email_inbox (
                id, client_id, from_email, from_name, to_email, subject,
                text_body, html_body, received_at, is_read, thread_id,
                message_id, in_reply_to, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.client_id.as_uuid())
        .bind(entry.from_email.as_str())
        .bind(entry.from_name.as_deref())
        .bind(entry.to_email.as_str())
        .bind(&entry.subject)
        .bind(&entry.text_body)
        .bind(entry.html_body.as_deref())
        .bind(entry.received_at)
        .bind(entry.is_read)
        .bind(entry.thread_id.as_str())
        .bind(entry.message_id.as_deref())
        .bind(entry.in_reply_to.as_deref())
        .bind(entry.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_inbox", e))?;

        Ok(entry)
    }

    #[instrument(skip(self), fields(inbox_id = %id), err)]
    async fn get(&self, id: InboxId) -> Result<Option<InboxEntry>, StoreError> {
        let row = sqlx::query("SELECT * FROM email_inbox WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_inbox", e))?;

        row.as_ref().map(inbox_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list(&self, filter: &InboxFilter) -> Result<Vec<InboxEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM email_inbox
            WHERE ($1::UUID IS NULL OR client_id = $1)
              AND (NOT $2 OR is_read = FALSE)
            ORDER BY received_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(filter.client_id.as_ref().map(ClientId::as_uuid))
        .bind(filter.unread_only)
        .bind(clamp_limit(filter.limit, 50, 500) as i64)
        .bind(filter.offset.unwrap_or(0) as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_inbox", e))?;

        rows.iter().map(inbox_from_row).collect()
    }

    #[instrument(skip(self), fields(inbox_id = %id), err)]
    async fn set_read(&self, id: InboxId, read: bool) -> Result<InboxEntry, StoreError> {
        let row = sqlx::query("UPDATE email_inbox SET is_read = $2 WHERE id = $1 RETURNING *")
            .bind(id.as_uuid())
            .bind(read)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_read", e))?
            .ok_or_else(|| StoreError::NotFound(format!("inbox {id}")))?;

        inbox_from_row(&row)
    }

    #[instrument(skip(self), fields(inbox_id = %id), err)]
    async fn delete(&self, id: InboxId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM email_inbox WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_inbox", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("inbox {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(client_id = %client_id), err)]
    async fn find_by_message_id(
        &self,
        client_id: ClientId,
        message_id: &str,
    ) -> Result<Option<InboxEntry>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM email_inbox
            WHERE client_id = $1 AND message_id = $2
            ORDER BY received_at ASC
            LIMIT 1
            "#,
        )
        .bind(client_id.as_uuid())
        .bind(message_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_message_id", e))?;

        row.as_ref().map(inbox_from_row).transpose()
    }

    #[instrument(skip(self), fields(thread_id = %thread_id), err)]
    async fn thread(&self, thread_id: &ThreadId) -> Result<Vec<InboxEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM email_inbox WHERE thread_id = $1 ORDER BY received_at ASC, id ASC",
        )
        .bind(thread_id.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("thread", e))?;

        rows.iter().map(inbox_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn unread_count(&self, client_id: Option<ClientId>) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM email_inbox WHERE is_read = FALSE AND ($1::UUID IS NULL OR client_id = $1)",
        )
        .bind(client_id.as_ref().map(ClientId::as_uuid))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("unread_count", e))?;

        Ok(count.max(0) as u64)
    }
}

fn inbox_from_row(row: &sqlx::postgres::PgRow) -> Result<InboxEntry, StoreError> {
    let decode = |e| map_sqlx_error("decode_inbox", e);
    let email = |col: &str| -> Result<EmailAddress, StoreError> {
        let raw: String = row.try_get(col).map_err(decode)?;
        EmailAddress::parse(&raw).map_err(StoreError::from)
    };

    let id: uuid::Uuid = row.try_get("id").map_err(decode)?;
    let client_id: uuid::Uuid = row.try_get("client_id").map_err(decode)?;
    let thread_id: String = row.try_get("thread_id").map_err(decode)?;

    Ok(InboxEntry {
        id: InboxId::from_uuid(id),
        client_id: ClientId::from_uuid(client_id),
        from_email: email("from_email")?,
        from_name: row.try_get("from_name").map_err(decode)?,
        to_email: email("to_email")?,
        subject: row.try_get("subject").map_err(decode)?,
        text_body: row.try_get("text_body").map_err(decode)?,
        html_body: row.try_get("html_body").map_err(decode)?,
        received_at: row.try_get("received_at").map_err(decode)?,
        is_read: row.try_get("is_read").map_err(decode)?,
        thread_id: ThreadId::from_raw(thread_id),
        message_id: row.try_get("message_id").map_err(decode)?,
        in_reply_to: row.try_get("in_reply_to").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}
