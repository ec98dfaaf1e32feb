//! Template lifecycle: validated create/update, lookup and rendering

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::metrics::TemplateMetrics;
use crate::notification::{Payload, SourceType};

use super::store::TemplateCatalog;
use super::substitution::render_template;
use super::types::{
    validate_body, validate_name, CreateTemplateRequest, NotificationTemplate, RenderOptions,
    RenderedMessage, TemplateError, TemplateResult, UpdateTemplateRequest,
};
use super::validation::validate_template;

/// Gatekeeper for template writes and the single entry point for rendering
pub struct TemplateService {
    catalog: Arc<dyn TemplateCatalog>,
}

impl TemplateService {
    pub fn new(catalog: Arc<dyn TemplateCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<dyn TemplateCatalog> {
        &self.catalog
    }

    /// Create a template after checking its variables against the catalog
    #[tracing::instrument(
        name = "templates.create",
        skip(self, request),
        fields(school_id = %request.school_id, source_type = %request.source_type)
    )]
    pub async fn create(&self, request: CreateTemplateRequest) -> TemplateResult<NotificationTemplate> {
        request.validate()?;

        let allowed = self
            .catalog
            .allowed_variables(&request.school_id, request.source_type)
            .await?;
        if let Err(e) = validate_template(
            &allowed,
            request.subject_template.as_deref(),
            &request.body_template,
        ) {
            TemplateMetrics::record_validation_failure();
            return Err(e.into());
        }

        let now = Utc::now();
        let template = NotificationTemplate {
            id: Uuid::new_v4(),
            school_id: request.school_id,
            source_type: request.source_type,
            channel: request.channel,
            locale: request.locale,
            name: request.name,
            subject_template: request.subject_template,
            body_template: request.body_template,
            status: request.status.unwrap_or_default(),
            version: 1,
            created_at: now,
            updated_at: now,
        };

        self.catalog.insert_template(&template).await?;

        tracing::info!(template_id = %template.id, "Template created");
        Ok(template)
    }

    /// Get a template by ID
    pub async fn get(&self, id: Uuid) -> TemplateResult<NotificationTemplate> {
        self.catalog
            .get_template(id)
            .await?
            .ok_or(TemplateError::NotFound(id))
    }

    pub async fn list(
        &self,
        school_id: &str,
        source_type: Option<SourceType>,
    ) -> TemplateResult<Vec<NotificationTemplate>> {
        Ok(self.catalog.list_templates(school_id, source_type).await?)
    }

    /// Update a template in place.
    ///
    /// The version only moves when subject or body text changes.
    #[tracing::instrument(name = "templates.update", skip(self, updates))]
    pub async fn update(
        &self,
        id: Uuid,
        updates: UpdateTemplateRequest,
    ) -> TemplateResult<NotificationTemplate> {
        let mut template = self.get(id).await?;
        let previous_version = template.version;

        if let Some(expected) = updates.expected_version {
            if expected != previous_version {
                return Err(TemplateError::VersionConflict {
                    id,
                    expected,
                    actual: previous_version,
                });
            }
        }

        if let Some(name) = updates.name {
            validate_name(&name)?;
            template.name = name;
        }

        if let Some(locale) = updates.locale {
            template.locale = locale;
        }

        if let Some(status) = updates.status {
            template.status = status;
        }

        let mut content_changed = false;

        if let Some(subject) = updates.subject_template {
            if subject != template.subject_template {
                template.subject_template = subject;
                content_changed = true;
            }
        }

        if let Some(body) = updates.body_template {
            validate_body(&body)?;
            if body != template.body_template {
                template.body_template = body;
                content_changed = true;
            }
        }

        let allowed = self
            .catalog
            .allowed_variables(&template.school_id, template.source_type)
            .await?;
        if let Err(e) = validate_template(
            &allowed,
            template.subject_template.as_deref(),
            &template.body_template,
        ) {
            TemplateMetrics::record_validation_failure();
            return Err(e.into());
        }

        if content_changed {
            template.version += 1;
        }
        template.updated_at = Utc::now();

        if !self.catalog.update_template(&template, previous_version).await? {
            let actual = self.get(id).await?.version;
            return Err(TemplateError::VersionConflict {
                id,
                expected: previous_version,
                actual,
            });
        }

        tracing::info!(template_id = %id, version = template.version, "Template updated");
        Ok(template)
    }

    /// Render an already-loaded template against a payload
    pub async fn render(
        &self,
        template: &NotificationTemplate,
        payload: &Payload,
        options: RenderOptions,
    ) -> TemplateResult<RenderedMessage> {
        let allowed = self
            .catalog
            .allowed_variables(&template.school_id, template.source_type)
            .await?;

        let result = render_template(template, &allowed, payload, options);
        if let Err(ref e) = result {
            TemplateMetrics::record_render_failure(e.code());
        }
        result
    }

    /// Load and render by template ID
    pub async fn render_by_id(
        &self,
        id: Uuid,
        payload: &Payload,
        options: RenderOptions,
    ) -> TemplateResult<RenderedMessage> {
        let template = self.get(id).await?;
        self.render(&template, payload, options).await
    }

    /// Authoring-time render: missing values are flagged, not fatal
    pub async fn preview(&self, id: Uuid, payload: &Payload) -> TemplateResult<RenderedMessage> {
        self.render_by_id(id, payload, RenderOptions::preview()).await
    }
}
