//! Template catalog storage: allowed-variable catalog plus template rows

use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::StoreError;
use crate::notification::SourceType;

use super::types::{NotificationTemplate, TemplateVariable};

/// Backend trait for template catalog storage.
///
/// Implementations must be thread-safe (`Send + Sync`) as they are shared
/// across request handlers and the dispatcher.
#[async_trait]
pub trait TemplateCatalog: Send + Sync {
    /// Backend type identifier
    fn backend_type(&self) -> &'static str;

    /// Variable keys templates of `source_type` may reference for `school_id`.
    async fn allowed_variables(
        &self,
        school_id: &str,
        source_type: SourceType,
    ) -> Result<BTreeSet<String>, StoreError>;

    /// Declare a catalog variable. Registering an existing key is a no-op.
    async fn register_variable(&self, variable: TemplateVariable) -> Result<(), StoreError>;

    async fn get_template(&self, id: Uuid) -> Result<Option<NotificationTemplate>, StoreError>;

    async fn insert_template(&self, template: &NotificationTemplate) -> Result<(), StoreError>;

    /// Overwrite a template if its stored version still equals `previous_version`.
    ///
    /// Returns `false` when the row moved on (or vanished) in the meantime.
    async fn update_template(
        &self,
        template: &NotificationTemplate,
        previous_version: i32,
    ) -> Result<bool, StoreError>;

    async fn list_templates(
        &self,
        school_id: &str,
        source_type: Option<SourceType>,
    ) -> Result<Vec<NotificationTemplate>, StoreError>;
}

/// In-memory template catalog.
///
/// Uses `DashMap` for concurrent access. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryTemplateCatalog {
    templates: DashMap<Uuid, NotificationTemplate>,
    variables: DashMap<(String, SourceType), BTreeSet<String>>,
}

impl MemoryTemplateCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TemplateCatalog for MemoryTemplateCatalog {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn allowed_variables(
        &self,
        school_id: &str,
        source_type: SourceType,
    ) -> Result<BTreeSet<String>, StoreError> {
        Ok(self
            .variables
            .get(&(school_id.to_string(), source_type))
            .map(|keys| keys.clone())
            .unwrap_or_default())
    }

    async fn register_variable(&self, variable: TemplateVariable) -> Result<(), StoreError> {
        self.variables
            .entry((variable.school_id, variable.source_type))
            .or_default()
            .insert(variable.key);
        Ok(())
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<NotificationTemplate>, StoreError> {
        Ok(self.templates.get(&id).map(|t| t.clone()))
    }

    async fn insert_template(&self, template: &NotificationTemplate) -> Result<(), StoreError> {
        if self.templates.contains_key(&template.id) {
            return Err(StoreError::Conflict(format!(
                "template {} already exists",
                template.id
            )));
        }
        self.templates.insert(template.id, template.clone());
        Ok(())
    }

    async fn update_template(
        &self,
        template: &NotificationTemplate,
        previous_version: i32,
    ) -> Result<bool, StoreError> {
        match self.templates.get_mut(&template.id) {
            Some(mut stored) if stored.version == previous_version => {
                *stored = template.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_templates(
        &self,
        school_id: &str,
        source_type: Option<SourceType>,
    ) -> Result<Vec<NotificationTemplate>, StoreError> {
        let mut templates: Vec<NotificationTemplate> = self
            .templates
            .iter()
            .filter(|entry| entry.school_id == school_id)
            .filter(|entry| source_type.map_or(true, |st| entry.source_type == st))
            .map(|entry| entry.value().clone())
            .collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }
}
