//! Notification template system.
//!
//! This module provides:
//! - Variable extraction for `{{variable}}` placeholders
//! - Catalog validation of referenced variables on every create/update
//! - Rendering with missing-value diagnostics (strict or preview)
//! - Template storage behind the `TemplateCatalog` trait (memory, PostgreSQL)
//!
//! # Example
//!
//! ```ignore
//! let service = TemplateService::new(Arc::new(MemoryTemplateCatalog::new()));
//!
//! let template = service.create(CreateTemplateRequest {
//!     school_id: "school-1".to_string(),
//!     source_type: SourceType::Transaction,
//!     channel: Channel::Email,
//!     locale: None,
//!     name: "Payment received".to_string(),
//!     subject_template: Some("Receipt {{receipt_no}}".to_string()),
//!     body_template: "Hi {{guardian_name}}, we received {{amount}}.".to_string(),
//!     status: None,
//! }).await?;
//!
//! let preview = service.preview(template.id, &payload).await?;
//! ```

mod postgres_store;
mod service;
mod store;
mod substitution;
mod types;
mod validation;

pub use postgres_store::PostgresTemplateCatalog;
pub use service::TemplateService;
pub use store::{MemoryTemplateCatalog, TemplateCatalog};
pub use substitution::{extract_vars, missing_marker, referenced_vars, render_template};
pub use types::{
    CreateTemplateRequest, NotificationTemplate, RenderDiagnostics, RenderOptions,
    RenderedMessage, TemplateError, TemplateResult, TemplateStatus, TemplateVariable,
    UpdateTemplateRequest,
};
pub use validation::{validate_template, TemplateValidationError, TemplateVarReport};
