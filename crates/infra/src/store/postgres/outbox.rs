//! Postgres-backed outbox (`email_queue` table).
//!
//! Claiming uses `FOR UPDATE SKIP LOCKED` inside a single `UPDATE … RETURNING`
//! so that concurrent processors never receive the same row. Finalization is
//! guarded on `status = 'sending' AND claimed_by = $worker`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use hireflow_core::{ClientId, EmailAddress, OutboxId, TemplateId, WorkerId};
use hireflow_mail::{Mailbox, OutboxEntry, OutboxStatus, Priority};

use crate::store::outbox::{OutboxFilter, OutboxStats, OutboxStore};
use crate::store::{clamp_limit, map_sqlx_error, StoreError};

#[derive(Debug, Clone)]
pub struct PostgresOutboxStore {
    pool: Arc<PgPool>,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    #[instrument(skip(self, entry), fields(outbox_id = %entry.id), err)]
    async fn enqueue(&self, entry: OutboxEntry) -> Result<OutboxEntry, StoreError> {
        let retry_count = to_int4("retry_count", entry.retry_count)?;
        let max_retries = to_int4("max_retries", entry.max_retries)?;

        sqlx::query(
            r#"
            INSERT INTO email_queue (
                id, to_email, to_name, from_email, from_name, reply_to,
                subject, html_body, text_body, priority, scheduled_at, status,
                retry_count, max_retries, error_message, sent_at, claimed_by,
                claimed_at, template_id, client_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.to.address.as_str())
        .bind(entry.to.name.as_deref())
        .bind(entry.from.address.as_str())
        .bind(entry.from.name.as_deref())
        .bind(entry.reply_to.as_ref().map(EmailAddress::as_str))
        .bind(&entry.subject)
        .bind(entry.html_body.as_deref())
        .bind(entry.text_body.as_deref())
        .bind(entry.priority.rank())
        .bind(entry.scheduled_at)
        .bind(entry.status.as_str())
        .bind(retry_count)
        .bind(max_retries)
        .bind(entry.error_message.as_deref())
        .bind(entry.sent_at)
        .bind(entry.claimed_by.as_ref().map(WorkerId::as_str))
        .bind(entry.claimed_at)
        .bind(entry.template_id.as_ref().map(TemplateId::as_uuid))
        .bind(entry.client_id.as_ref().map(ClientId::as_uuid))
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("enqueue", e))?;

        Ok(entry)
    }

    #[instrument(skip(self), fields(outbox_id = %id), err)]
    async fn get(&self, id: OutboxId) -> Result<Option<OutboxEntry>, StoreError> {
        let row = sqlx::query("SELECT * FROM email_queue WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_outbox", e))?;

        row.as_ref().map(outbox_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list(&self, filter: &OutboxFilter) -> Result<Vec<OutboxEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM email_queue
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(filter.status.map(OutboxStatus::as_str))
        .bind(clamp_limit(filter.limit, 50, 500) as i64)
        .bind(filter.offset.unwrap_or(0) as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_outbox", e))?;

        rows.iter().map(outbox_from_row).collect()
    }

    #[instrument(skip(self), fields(worker = %worker), err)]
    async fn claim_batch(
        &self,
        worker: &WorkerId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE email_queue
            SET status = 'sending', claimed_by = $1, claimed_at = $2, updated_at = $2
            WHERE id IN (
                SELECT id FROM email_queue
                WHERE status = 'pending' AND scheduled_at <= $2
                ORDER BY priority ASC, scheduled_at ASC, created_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(worker.as_str())
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_batch", e))?;

        let mut claimed = rows.iter().map(outbox_from_row).collect::<Result<Vec<_>, _>>()?;
        claimed.sort_by_key(OutboxEntry::dispatch_key);
        Ok(claimed)
    }

    #[instrument(skip(self, entry), fields(worker = %worker, outbox_id = %entry.id, status = %entry.status), err)]
    async fn finalize(&self, worker: &WorkerId, entry: &OutboxEntry) -> Result<(), StoreError> {
        let retry_count = to_int4("retry_count", entry.retry_count)?;

        let result = sqlx::query(
            r#"
            UPDATE email_queue
            SET status = $3,
                retry_count = $4,
                scheduled_at = $5,
                error_message = $6,
                sent_at = $7,
                claimed_by = $8,
                claimed_at = $9,
                updated_at = $10
            WHERE id = $1 AND status = 'sending' AND claimed_by = $2
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(worker.as_str())
        .bind(entry.status.as_str())
        .bind(retry_count)
        .bind(entry.scheduled_at)
        .bind(entry.error_message.as_deref())
        .bind(entry.sent_at)
        .bind(entry.claimed_by.as_ref().map(WorkerId::as_str))
        .bind(entry.claimed_at)
        .bind(entry.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("finalize", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ClaimLost(entry.id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn release_stale(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE email_queue
            SET status = 'pending', claimed_by = NULL, claimed_at = NULL, updated_at = $2
            WHERE status = 'sending' AND (claimed_at IS NULL OR claimed_at < $1)
            "#,
        )
        .bind(claimed_before)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("release_stale", e))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(outbox_id = %id), err)]
    async fn requeue_failed(&self, id: OutboxId, now: DateTime<Utc>) -> Result<OutboxEntry, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE email_queue
            SET status = 'pending',
                retry_count = 0,
                scheduled_at = $2,
                error_message = NULL,
                claimed_by = NULL,
                claimed_at = NULL,
                updated_at = $2
            WHERE id = $1 AND status = 'failed'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("requeue_failed", e))?;

        match row {
            Some(row) => outbox_from_row(&row),
            None => match self.get(id).await? {
                Some(existing) => Err(StoreError::Conflict(format!(
                    "only failed emails can be requeued (outbox {} is {})",
                    id, existing.status
                ))),
                None => Err(StoreError::NotFound(format!("outbox {id}"))),
            },
        }
    }

    #[instrument(skip(self), err)]
    async fn stats(&self, now: DateTime<Utc>) -> Result<OutboxStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'sending') AS sending,
                COUNT(*) FILTER (WHERE status = 'sent') AS sent,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'pending' AND scheduled_at <= $1) AS due
            FROM email_queue
            "#,
        )
        .bind(now)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("outbox_stats", e))?;

        let count = |name: &str| -> Result<u64, StoreError> {
            row.try_get::<i64, _>(name)
                .map(|n| n.max(0) as u64)
                .map_err(|e| map_sqlx_error("outbox_stats", e))
        };

        Ok(OutboxStats {
            pending: count("pending")?,
            sending: count("sending")?,
            sent: count("sent")?,
            failed: count("failed")?,
            due: count("due")?,
        })
    }
}

fn to_int4(column: &str, value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Invalid(format!("{column} out of range: {value}")))
}

fn outbox_from_row(row: &sqlx::postgres::PgRow) -> Result<OutboxEntry, StoreError> {
    let decode = |e| map_sqlx_error("decode_outbox", e);

    let mailbox = |email_col: &str, name_col: &str| -> Result<Mailbox, StoreError> {
        let email: String = row.try_get(email_col).map_err(decode)?;
        let name: Option<String> = row.try_get(name_col).map_err(decode)?;
        let address = EmailAddress::parse(&email).map_err(StoreError::from)?;
        Ok(Mailbox::new(address, name))
    };

    let reply_to: Option<String> = row.try_get("reply_to").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let priority: i16 = row.try_get("priority").map_err(decode)?;
    let retry_count: i32 = row.try_get("retry_count").map_err(decode)?;
    let max_retries: i32 = row.try_get("max_retries").map_err(decode)?;
    let claimed_by: Option<String> = row.try_get("claimed_by").map_err(decode)?;
    let template_id: Option<uuid::Uuid> = row.try_get("template_id").map_err(decode)?;
    let client_id: Option<uuid::Uuid> = row.try_get("client_id").map_err(decode)?;
    let id: uuid::Uuid = row.try_get("id").map_err(decode)?;

    Ok(OutboxEntry {
        id: OutboxId::from_uuid(id),
        to: mailbox("to_email", "to_name")?,
        from: mailbox("from_email", "from_name")?,
        reply_to: reply_to
            .as_deref()
            .map(EmailAddress::parse)
            .transpose()
            .map_err(StoreError::from)?,
        subject: row.try_get("subject").map_err(decode)?,
        html_body: row.try_get("html_body").map_err(decode)?,
        text_body: row.try_get("text_body").map_err(decode)?,
        priority: Priority::from_rank(priority),
        scheduled_at: row.try_get("scheduled_at").map_err(decode)?,
        status: OutboxStatus::parse(&status).map_err(StoreError::from)?,
        retry_count: retry_count.max(0) as u32,
        max_retries: max_retries.max(0) as u32,
        error_message: row.try_get("error_message").map_err(decode)?,
        sent_at: row.try_get("sent_at").map_err(decode)?,
        claimed_by: claimed_by.map(WorkerId::new),
        claimed_at: row.try_get("claimed_at").map_err(decode)?,
        template_id: template_id.map(TemplateId::from_uuid),
        client_id: client_id.map(ClientId::from_uuid),
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}
