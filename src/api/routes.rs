use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::server::{api_key_auth, AppState};

use super::health::{health, stats};
use super::metrics::prometheus_metrics;
use super::notification::{notification_status, notify, refund_delivery, retry_delivery};
use super::recipient::{list_subscriptions, set_preference, upsert_subscription};
use super::template::{
    create_template, get_template, list_templates, list_variables, preview_template,
    register_variable, update_template,
};

pub fn api_routes(state: AppState) -> Router<AppState> {
    let v1 = Router::new()
        // Dispatch
        .route("/notifications", post(notify))
        .route("/notifications/status", get(notification_status))
        .route(
            "/notifications/{id}/deliveries/{channel}/retry",
            post(retry_delivery),
        )
        .route(
            "/notifications/{id}/deliveries/{channel}/refund",
            post(refund_delivery),
        )
        // Templates
        .route("/templates", post(create_template).get(list_templates))
        .route("/templates/{id}", get(get_template).put(update_template))
        .route("/templates/{id}/preview", post(preview_template))
        .route(
            "/template-variables",
            post(register_variable).get(list_variables),
        )
        // Recipient reference data
        .route("/recipients/{id}/preferences", put(set_preference))
        .route(
            "/recipients/{id}/subscriptions",
            put(upsert_subscription).get(list_subscriptions),
        )
        .route_layer(middleware::from_fn_with_state(state, api_key_auth));

    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .nest("/api/v1", v1)
}
