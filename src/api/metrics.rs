//! Prometheus scrape endpoint.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::metrics::{self, ServiceMetrics};
use crate::server::AppState;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    refresh_gauges(&state);

    match metrics::encode_metrics() {
        Ok(output) => (StatusCode::OK, [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], output),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Gauges that mirror application state rather than counting events
fn refresh_gauges(state: &AppState) {
    ServiceMetrics::set_uptime(state.start_time.elapsed().as_secs());
    if let Some(pg) = &state.postgres_pool {
        let pool = pg.pool();
        ServiceMetrics::set_pool(pool.size(), pool.num_idle());
    }
}
