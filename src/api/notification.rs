//! Notification dispatch and status endpoints.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::notification::{
    Channel, NotificationOutcome, NotifyRequest, Recipient, SourceStatus, SourceType, StatusQuery,
};
use crate::server::AppState;

/// Query string for the status endpoint; `source_ids` is comma-separated
#[derive(Debug, Deserialize)]
pub struct StatusParams {
    pub school_id: String,
    pub source_type: SourceType,
    pub source_ids: String,
    pub recipient_id: Option<String>,
}

impl StatusParams {
    fn into_query(self) -> Result<StatusQuery> {
        let source_ids: Vec<String> = self
            .source_ids
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect();
        if source_ids.is_empty() {
            return Err(AppError::Validation("source_ids must not be empty".to_string()));
        }

        Ok(StatusQuery {
            school_id: self.school_id,
            source_type: self.source_type,
            source_ids,
            recipient_id: self.recipient_id.filter(|r| !r.is_empty()),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub statuses: BTreeMap<String, SourceStatus>,
}

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    pub recipient: Recipient,
}

#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub notification_id: Uuid,
    pub channel: Channel,
    pub refunded: bool,
}

fn parse_channel(raw: &str) -> Result<Channel> {
    raw.to_ascii_uppercase()
        .parse()
        .map_err(|e: crate::notification::ParseEnumError| AppError::Validation(e.to_string()))
}

/// POST /api/v1/notifications - Record an event and deliver it
#[tracing::instrument(
    name = "http.notify",
    skip(state, request),
    fields(school_id = %request.school_id, source_id = %request.source_id)
)]
pub async fn notify(
    State(state): State<AppState>,
    Json(request): Json<NotifyRequest>,
) -> Result<Json<NotificationOutcome>> {
    if request.recipient.id.trim().is_empty() {
        return Err(AppError::Validation("recipient.id is required".to_string()));
    }
    if request.source_id.trim().is_empty() {
        return Err(AppError::Validation("source_id is required".to_string()));
    }

    let outcome = state.dispatcher.notify(request).await?;
    Ok(Json(outcome))
}

/// GET /api/v1/notifications/status - Rollup per source id
#[tracing::instrument(name = "http.notification_status", skip(state, params))]
pub async fn notification_status(
    State(state): State<AppState>,
    Query(params): Query<StatusParams>,
) -> Result<Json<StatusResponse>> {
    let query = params.into_query()?;
    let statuses = state.dispatcher.get_statuses(&query).await?;
    Ok(Json(StatusResponse { statuses }))
}

/// POST /api/v1/notifications/{id}/deliveries/{channel}/retry
#[tracing::instrument(name = "http.retry_delivery", skip(state, request))]
pub async fn retry_delivery(
    State(state): State<AppState>,
    Path((id, channel)): Path<(Uuid, String)>,
    Json(request): Json<RetryRequest>,
) -> Result<Json<NotificationOutcome>> {
    let channel = parse_channel(&channel)?;
    let outcome = state
        .dispatcher
        .retry_channel(id, channel, &request.recipient)
        .await?;
    Ok(Json(outcome))
}

/// POST /api/v1/notifications/{id}/deliveries/{channel}/refund
#[tracing::instrument(name = "http.refund_delivery", skip(state))]
pub async fn refund_delivery(
    State(state): State<AppState>,
    Path((id, channel)): Path<(Uuid, String)>,
) -> Result<Json<RefundResponse>> {
    let channel = parse_channel(&channel)?;
    let refunded = state.dispatcher.refund_credit(id, channel).await?;
    Ok(Json(RefundResponse {
        notification_id: id,
        channel,
        refunded,
    }))
}
