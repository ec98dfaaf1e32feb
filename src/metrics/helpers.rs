//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::notification::{Channel, DeliveryStatus};

use super::{
    CREDITS_RACE_LOST_TOTAL, CREDITS_RESERVED_TOTAL, CREDITS_REFUNDED_TOTAL, DELIVERIES_TOTAL,
    NOTIFY_ABORTED_TOTAL, NOTIFY_REQUESTS_TOTAL, POSTGRES_POOL_CONNECTIONS,
    TEMPLATE_RENDER_FAILURES_TOTAL, TEMPLATE_VALIDATION_FAILURES_TOTAL, TRANSPORT_LATENCY,
    UPTIME_SECONDS,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording dispatch metrics
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    pub fn record_notify() {
        NOTIFY_REQUESTS_TOTAL.inc();
    }

    pub fn record_aborted(code: &str) {
        NOTIFY_ABORTED_TOTAL.with_label_values(&[code]).inc();
    }

    pub fn record_status(channel: Channel, status: DeliveryStatus) {
        DELIVERIES_TOTAL
            .with_label_values(&[channel.as_str(), status.as_str()])
            .inc();
    }

    pub fn record_transport_latency(channel: Channel, latency_secs: f64) {
        TRANSPORT_LATENCY
            .with_label_values(&[channel.as_str()])
            .observe(latency_secs);
    }
}

/// Helper struct for metered credit metrics
pub struct CreditMetrics;

impl CreditMetrics {
    pub fn record_reserved(channel: Channel) {
        CREDITS_RESERVED_TOTAL
            .with_label_values(&[channel.as_str()])
            .inc();
    }

    pub fn record_race_lost(channel: Channel) {
        CREDITS_RACE_LOST_TOTAL
            .with_label_values(&[channel.as_str()])
            .inc();
    }

    pub fn record_refunded(channel: Channel) {
        CREDITS_REFUNDED_TOTAL
            .with_label_values(&[channel.as_str()])
            .inc();
    }
}

/// Gauges refreshed from application state on every scrape
pub struct ServiceMetrics;

impl ServiceMetrics {
    pub fn set_pool(size: u32, idle: usize) {
        let idle = idle as i64;
        POSTGRES_POOL_CONNECTIONS
            .with_label_values(&["idle"])
            .set(idle);
        POSTGRES_POOL_CONNECTIONS
            .with_label_values(&["in_use"])
            .set((size as i64 - idle).max(0));
    }

    pub fn set_uptime(seconds: u64) {
        UPTIME_SECONDS.set(seconds as i64);
    }
}

/// Helper struct for template metrics
pub struct TemplateMetrics;

impl TemplateMetrics {
    pub fn record_validation_failure() {
        TEMPLATE_VALIDATION_FAILURES_TOTAL.inc();
    }

    pub fn record_render_failure(code: &str) {
        TEMPLATE_RENDER_FAILURES_TOTAL.with_label_values(&[code]).inc();
    }
}
