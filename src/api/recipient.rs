//! Recipient reference data: channel preferences and subscriptions.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::notification::{Channel, SourceType, Subscription, SubscriptionStatus};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct PreferenceRequest {
    pub source_type: SourceType,
    pub channel: Channel,
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionRequest {
    pub channel: Channel,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub balance: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionsResponse {
    pub entity_id: String,
    pub subscriptions: Vec<Subscription>,
}

/// PUT /api/v1/recipients/{id}/preferences
#[tracing::instrument(name = "http.set_preference", skip(state, request))]
pub async fn set_preference(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
    Json(request): Json<PreferenceRequest>,
) -> Result<StatusCode> {
    state
        .dispatcher
        .store()
        .set_preference(&entity_id, request.source_type, request.channel, request.enabled)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/recipients/{id}/subscriptions
#[tracing::instrument(name = "http.upsert_subscription", skip(state, request))]
pub async fn upsert_subscription(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
    Json(request): Json<SubscriptionRequest>,
) -> Result<StatusCode> {
    if request.balance.is_some_and(|b| b < 0) {
        return Err(AppError::Validation("balance must not be negative".to_string()));
    }

    state
        .dispatcher
        .store()
        .upsert_subscription(&Subscription {
            entity_id,
            channel: request.channel,
            status: request.status,
            balance: request.balance,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/recipients/{id}/subscriptions
#[tracing::instrument(name = "http.list_subscriptions", skip(state))]
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> Result<Json<SubscriptionsResponse>> {
    let subscriptions = state.dispatcher.store().subscriptions(&entity_id).await?;
    Ok(Json(SubscriptionsResponse {
        entity_id,
        subscriptions,
    }))
}
