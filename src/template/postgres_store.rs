//! PostgreSQL-backed template catalog.
//!
//! Tables:
//! - `notification_template_variables` - (school_id, source_type, key) catalog
//! - `notification_templates` - template rows with an optimistic `version`

use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::notification::SourceType;

use super::store::TemplateCatalog;
use super::types::{NotificationTemplate, TemplateVariable};

const TEMPLATE_COLUMNS: &str = "id, school_id, source_type, channel, locale, name, \
     subject_template, body_template, status, version, created_at, updated_at";

/// PostgreSQL template catalog
pub struct PostgresTemplateCatalog {
    pool: PgPool,
}

impl PostgresTemplateCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn template_from_row(row: &PgRow) -> Result<NotificationTemplate, StoreError> {
    Ok(NotificationTemplate {
        id: row.try_get("id")?,
        school_id: row.try_get("school_id")?,
        source_type: StoreError::parse_column(row.try_get::<String, _>("source_type")?)?,
        channel: StoreError::parse_column(row.try_get::<String, _>("channel")?)?,
        locale: row.try_get("locale")?,
        name: row.try_get("name")?,
        subject_template: row.try_get("subject_template")?,
        body_template: row.try_get("body_template")?,
        status: StoreError::parse_column(row.try_get::<String, _>("status")?)?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl TemplateCatalog for PostgresTemplateCatalog {
    fn backend_type(&self) -> &'static str {
        "postgres"
    }

    async fn allowed_variables(
        &self,
        school_id: &str,
        source_type: SourceType,
    ) -> Result<BTreeSet<String>, StoreError> {
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT key FROM notification_template_variables WHERE school_id = $1 AND source_type = $2",
        )
        .bind(school_id)
        .bind(source_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(keys.into_iter().collect())
    }

    async fn register_variable(&self, variable: TemplateVariable) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notification_template_variables (school_id, source_type, key, description)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (school_id, source_type, key) DO NOTHING
            "#,
        )
        .bind(&variable.school_id)
        .bind(variable.source_type.as_str())
        .bind(&variable.key)
        .bind(&variable.description)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<NotificationTemplate>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM notification_templates WHERE id = $1",
            TEMPLATE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(template_from_row).transpose()
    }

    async fn insert_template(&self, template: &NotificationTemplate) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notification_templates
                (id, school_id, source_type, channel, locale, name, subject_template,
                 body_template, status, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(template.id)
        .bind(&template.school_id)
        .bind(template.source_type.as_str())
        .bind(template.channel.as_str())
        .bind(&template.locale)
        .bind(&template.name)
        .bind(&template.subject_template)
        .bind(&template.body_template)
        .bind(template.status.as_str())
        .bind(template.version)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_template(
        &self,
        template: &NotificationTemplate,
        previous_version: i32,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE notification_templates
            SET locale = $2, name = $3, subject_template = $4, body_template = $5,
                status = $6, version = $7, updated_at = $8
            WHERE id = $1 AND version = $9
            "#,
        )
        .bind(template.id)
        .bind(&template.locale)
        .bind(&template.name)
        .bind(&template.subject_template)
        .bind(&template.body_template)
        .bind(template.status.as_str())
        .bind(template.version)
        .bind(template.updated_at)
        .bind(previous_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_templates(
        &self,
        school_id: &str,
        source_type: Option<SourceType>,
    ) -> Result<Vec<NotificationTemplate>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM notification_templates \
             WHERE school_id = $1 AND ($2::text IS NULL OR source_type = $2) \
             ORDER BY name",
            TEMPLATE_COLUMNS
        ))
        .bind(school_id)
        .bind(source_type.map(SourceType::as_str))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(template_from_row).collect()
    }
}
