//! Template types and error definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::StoreError;
use crate::notification::{Channel, SourceType};

use super::validation::TemplateValidationError;

/// Template-specific error type
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error(transparent)]
    Validation(#[from] TemplateValidationError),

    #[error("Template not found: {0}")]
    NotFound(Uuid),

    #[error("Template references variables outside the catalog: {}", .0.join(", "))]
    UnknownVariable(Vec<String>),

    #[error("Payload is missing values for: {}", .0.join(", "))]
    MissingPayload(Vec<String>),

    #[error("Template {id} was modified concurrently (expected version {expected}, found {actual})")]
    VersionConflict { id: Uuid, expected: i32, actual: i32 },

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TemplateError {
    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            TemplateError::Validation(_) => "TEMPLATE_VALIDATION_ERROR",
            TemplateError::NotFound(_) => "TEMPLATE_NOT_FOUND",
            TemplateError::UnknownVariable(_) => "UNKNOWN_TEMPLATE_VARIABLE",
            TemplateError::MissingPayload(_) => "MISSING_PAYLOAD_VALUE",
            TemplateError::VersionConflict { .. } => "TEMPLATE_VERSION_CONFLICT",
            TemplateError::InvalidTemplate(_) => "INVALID_TEMPLATE",
            TemplateError::Store(e) => e.code(),
        }
    }
}

/// Result type for template operations
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Publication state of a template
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateStatus {
    #[default]
    Draft,
    Published,
}

impl TemplateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TemplateStatus::Draft => "DRAFT",
            TemplateStatus::Published => "PUBLISHED",
        }
    }
}

impl std::str::FromStr for TemplateStatus {
    type Err = crate::notification::ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(TemplateStatus::Draft),
            "PUBLISHED" => Ok(TemplateStatus::Published),
            other => Err(crate::notification::ParseEnumError {
                kind: "template status",
                value: other.to_string(),
            }),
        }
    }
}

/// A stored message template with {{variable}} placeholders
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTemplate {
    pub id: Uuid,
    pub school_id: String,
    pub source_type: SourceType,
    pub channel: Channel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_template: Option<String>,
    pub body_template: String,
    pub status: TemplateStatus,
    /// Bumped only when subject or body text changes
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Catalog entry declaring a variable usable by a source type's templates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVariable {
    pub school_id: String,
    pub source_type: SourceType,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Request to create a new template
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTemplateRequest {
    pub school_id: String,
    pub source_type: SourceType,
    pub channel: Channel,
    #[serde(default)]
    pub locale: Option<String>,
    pub name: String,
    #[serde(default)]
    pub subject_template: Option<String>,
    pub body_template: String,
    /// Defaults to DRAFT
    #[serde(default)]
    pub status: Option<TemplateStatus>,
}

impl CreateTemplateRequest {
    pub fn validate(&self) -> TemplateResult<()> {
        validate_name(&self.name)?;
        validate_body(&self.body_template)
    }
}

/// Request to update an existing template.
///
/// Double options distinguish "leave as is" (field absent) from "clear" (null).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTemplateRequest {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "double_option")]
    pub locale: Option<Option<String>>,

    #[serde(default, deserialize_with = "double_option")]
    pub subject_template: Option<Option<String>>,

    #[serde(default)]
    pub body_template: Option<String>,

    #[serde(default)]
    pub status: Option<TemplateStatus>,

    /// Reject the update when the stored version differs
    #[serde(default)]
    pub expected_version: Option<i32>,
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub(crate) fn validate_name(name: &str) -> TemplateResult<()> {
    if name.trim().is_empty() || name.len() > 256 {
        return Err(TemplateError::InvalidTemplate(
            "Name must be 1-256 characters".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_body(body: &str) -> TemplateResult<()> {
    if body.trim().is_empty() {
        return Err(TemplateError::InvalidTemplate(
            "Body template is required".to_string(),
        ));
    }
    Ok(())
}

/// Per-call rendering switches
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Fail instead of emitting missing-value placeholders
    pub throw_on_missing_payload: bool,
}

impl RenderOptions {
    /// Production sends: incomplete messages never go out.
    pub fn strict() -> Self {
        Self {
            throw_on_missing_payload: true,
        }
    }

    /// Authoring-time previews: gaps are flagged inline.
    pub fn preview() -> Self {
        Self {
            throw_on_missing_payload: false,
        }
    }
}

/// What the renderer saw while substituting
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderDiagnostics {
    pub referenced_vars: Vec<String>,
    pub missing_vars: Vec<String>,
}

/// A rendered subject/body pair ready for a transport
#[derive(Debug, Clone, Serialize)]
pub struct RenderedMessage {
    pub subject: Option<String>,
    pub body: String,
    pub diagnostics: RenderDiagnostics,
}
