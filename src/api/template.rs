//! Template catalog endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::notification::{Payload, SourceType};
use crate::server::AppState;
use crate::template::{
    CreateTemplateRequest, NotificationTemplate, RenderedMessage, TemplateVariable,
    UpdateTemplateRequest,
};

#[derive(Debug, Deserialize)]
pub struct ListTemplatesParams {
    pub school_id: String,
    pub source_type: Option<SourceType>,
}

#[derive(Debug, Serialize)]
pub struct TemplateListResponse {
    pub templates: Vec<NotificationTemplate>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    #[serde(default)]
    pub payload: Payload,
}

#[derive(Debug, Deserialize)]
pub struct VariablesParams {
    pub school_id: String,
    pub source_type: SourceType,
}

#[derive(Debug, Serialize)]
pub struct VariablesResponse {
    pub keys: Vec<String>,
}

/// POST /api/v1/templates - Create a template
#[tracing::instrument(
    name = "http.create_template",
    skip(state, request),
    fields(school_id = %request.school_id, source_type = %request.source_type)
)]
pub async fn create_template(
    State(state): State<AppState>,
    Json(request): Json<CreateTemplateRequest>,
) -> Result<(StatusCode, Json<NotificationTemplate>)> {
    let created = state.templates.create(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/v1/templates?school_id=..&source_type=..
#[tracing::instrument(name = "http.list_templates", skip(state, params), fields(school_id = %params.school_id))]
pub async fn list_templates(
    State(state): State<AppState>,
    Query(params): Query<ListTemplatesParams>,
) -> Result<Json<TemplateListResponse>> {
    let templates = state
        .templates
        .list(&params.school_id, params.source_type)
        .await?;
    let total = templates.len();

    Ok(Json(TemplateListResponse { templates, total }))
}

/// GET /api/v1/templates/{id}
#[tracing::instrument(name = "http.get_template", skip(state))]
pub async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<NotificationTemplate>> {
    Ok(Json(state.templates.get(id).await?))
}

/// PUT /api/v1/templates/{id}
#[tracing::instrument(name = "http.update_template", skip(state, request))]
pub async fn update_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateTemplateRequest>,
) -> Result<Json<NotificationTemplate>> {
    Ok(Json(state.templates.update(id, request).await?))
}

/// POST /api/v1/templates/{id}/preview - Non-strict render
#[tracing::instrument(name = "http.preview_template", skip(state, request))]
pub async fn preview_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<PreviewRequest>,
) -> Result<Json<RenderedMessage>> {
    Ok(Json(state.templates.preview(id, &request.payload).await?))
}

/// POST /api/v1/template-variables - Declare a catalog variable
#[tracing::instrument(
    name = "http.register_variable",
    skip(state, variable),
    fields(school_id = %variable.school_id, key = %variable.key)
)]
pub async fn register_variable(
    State(state): State<AppState>,
    Json(variable): Json<TemplateVariable>,
) -> Result<StatusCode> {
    let key = variable.key.as_str();
    let valid = key
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(AppError::Validation(format!(
            "Invalid variable key: {:?}",
            variable.key
        )));
    }

    state.templates.catalog().register_variable(variable).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/template-variables?school_id=..&source_type=..
#[tracing::instrument(name = "http.list_variables", skip(state, params))]
pub async fn list_variables(
    State(state): State<AppState>,
    Query(params): Query<VariablesParams>,
) -> Result<Json<VariablesResponse>> {
    let keys = state
        .templates
        .catalog()
        .allowed_variables(&params.school_id, params.source_type)
        .await?;
    Ok(Json(VariablesResponse {
        keys: keys.into_iter().collect(),
    }))
}
