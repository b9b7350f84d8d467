//! Postgres-backed template store (`email_templates` table).
//!
//! The one-default-per-category rule is enforced inside a transaction here
//! and backed by a partial unique index in the schema.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use hireflow_core::TemplateId;
use hireflow_mail::Template;

use crate::store::templates::TemplateStore;
use crate::store::{map_sqlx_error, StoreError};

#[derive(Debug, Clone)]
pub struct PostgresTemplateStore {
    pool: Arc<PgPool>,
}

impl PostgresTemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl TemplateStore for PostgresTemplateStore {
    #[instrument(skip(self, template), fields(template_id = %template.id, name = %template.name), err)]
    async fn create(&self, template: Template) -> Result<Template, StoreError> {
        let template = Template {
            is_default: false,
            ..template
        };

        sqlx::query(
            r#"
            INSERT INTO email_templates (
                id, name, category, subject, html_body, text_body, variables,
                is_active, is_default, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(template.id.as_uuid())
        .bind(&template.name)
        .bind(&template.category)
        .bind(&template.subject)
        .bind(&template.html_body)
        .bind(template.text_body.as_deref())
        .bind(serde_json::json!(template.variables))
        .bind(template.is_active)
        .bind(template.is_default)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_template", e))?;

        Ok(template)
    }

    #[instrument(skip(self), fields(template_id = %id), err)]
    async fn get(&self, id: TemplateId) -> Result<Option<Template>, StoreError> {
        let row = sqlx::query("SELECT * FROM email_templates WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_template", e))?;

        row.as_ref().map(template_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_by_name(&self, name: &str) -> Result<Option<Template>, StoreError> {
        let row = sqlx::query("SELECT * FROM email_templates WHERE LOWER(name) = LOWER($1)")
            .bind(name.trim())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_template_by_name", e))?;

        row.as_ref().map(template_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list(&self, category: Option<&str>) -> Result<Vec<Template>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM email_templates
            WHERE ($1::TEXT IS NULL OR category = $1)
            ORDER BY category ASC, name ASC
            "#,
        )
        .bind(category.map(|c| c.trim().to_ascii_lowercase()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_templates", e))?;

        rows.iter().map(template_from_row).collect()
    }

    #[instrument(skip(self, template), fields(template_id = %template.id), err)]
    async fn update(&self, template: Template) -> Result<Template, StoreError> {
        // The default flag is only ever cleared here; `set_default` moves it.
        let row = sqlx::query(
            r#"
            UPDATE email_templates
            SET name = $2, category = $3, subject = $4, html_body = $5, text_body = $6,
                variables = $7, is_active = $8,
                is_default = is_default AND $8 AND category = $3,
                updated_at = $9
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(template.id.as_uuid())
        .bind(&template.name)
        .bind(&template.category)
        .bind(&template.subject)
        .bind(&template.html_body)
        .bind(template.text_body.as_deref())
        .bind(serde_json::json!(template.variables))
        .bind(template.is_active)
        .bind(template.updated_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_template", e))?
        .ok_or_else(|| StoreError::NotFound(format!("template {}", template.id)))?;

        template_from_row(&row)
    }

    #[instrument(skip(self), fields(template_id = %id), err)]
    async fn delete(&self, id: TemplateId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM email_templates WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_template", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("template {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(template_id = %id), err)]
    async fn set_default(&self, id: TemplateId, now: DateTime<Utc>) -> Result<Template, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("set_default_begin", e))?;

        let row = sqlx::query("SELECT category, is_active FROM email_templates WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_default_lookup", e))?
            .ok_or_else(|| StoreError::NotFound(format!("template {id}")))?;

        let category: String = row.try_get("category").map_err(|e| map_sqlx_error("set_default_lookup", e))?;
        let is_active: bool = row.try_get("is_active").map_err(|e| map_sqlx_error("set_default_lookup", e))?;
        if !is_active {
            return Err(StoreError::Conflict(format!(
                "inactive template {id} cannot be the default"
            )));
        }

        sqlx::query(
            r#"
            UPDATE email_templates
            SET is_default = FALSE, updated_at = $3
            WHERE category = $1 AND id <> $2 AND is_default
            "#,
        )
        .bind(&category)
        .bind(id.as_uuid())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("set_default_clear", e))?;

        let row = sqlx::query(
            "UPDATE email_templates SET is_default = TRUE, updated_at = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id.as_uuid())
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("set_default", e))?;

        let template = template_from_row(&row)?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("set_default_commit", e))?;
        Ok(template)
    }

    #[instrument(skip(self), err)]
    async fn default_for(&self, category: &str) -> Result<Option<Template>, StoreError> {
        let row = sqlx::query("SELECT * FROM email_templates WHERE category = $1 AND is_default LIMIT 1")
            .bind(category.trim().to_ascii_lowercase())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("default_template", e))?;

        row.as_ref().map(template_from_row).transpose()
    }
}

fn template_from_row(row: &sqlx::postgres::PgRow) -> Result<Template, StoreError> {
    let decode = |e| map_sqlx_error("decode_template", e);

    let id: uuid::Uuid = row.try_get("id").map_err(decode)?;
    let variables: serde_json::Value = row.try_get("variables").map_err(decode)?;
    let variables: Vec<String> = serde_json::from_value(variables)
        .map_err(|e| StoreError::Invalid(format!("template variables: {e}")))?;

    Ok(Template {
        id: TemplateId::from_uuid(id),
        name: row.try_get("name").map_err(decode)?,
        category: row.try_get("category").map_err(decode)?,
        subject: row.try_get("subject").map_err(decode)?,
        html_body: row.try_get("html_body").map_err(decode)?,
        text_body: row.try_get("text_body").map_err(decode)?,
        variables,
        is_active: row.try_get("is_active").map_err(decode)?,
        is_default: row.try_get("is_default").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}
