//! Prometheus metrics for the notification engine.
//!
//! This module provides metrics for monitoring dispatch:
//! - Notify calls (requested, aborted by reason)
//! - Channel deliveries by channel and terminal status
//! - Metered credit reservations and refunds
//! - Transport latency per channel
//! - Template validation and render failures
//! - Postgres pool usage and uptime, refreshed on scrape

mod helpers;

pub use helpers::{encode_metrics, CreditMetrics, DeliveryMetrics, ServiceMetrics, TemplateMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "school_notify";

lazy_static! {
    // ============================================================================
    // Dispatch Metrics
    // ============================================================================

    /// Total notify calls received
    pub static ref NOTIFY_REQUESTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notify_requests_total", METRIC_PREFIX),
        "Total notify calls received"
    ).unwrap();

    /// Notify calls that aborted before any channel was attempted
    pub static ref NOTIFY_ABORTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_notify_aborted_total", METRIC_PREFIX),
        "Notify calls aborted before any send, by error code",
        &["code"]
    ).unwrap();

    /// Delivery row transitions by channel and status
    pub static ref DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_deliveries_total", METRIC_PREFIX),
        "Delivery row transitions by channel and status",
        &["channel", "status"]
    ).unwrap();

    /// Transport call latency
    pub static ref TRANSPORT_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_transport_latency_seconds", METRIC_PREFIX),
        "Transport send latency in seconds",
        &["channel"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    // ============================================================================
    // Credit Metrics
    // ============================================================================

    /// Credits reserved ahead of a metered send
    pub static ref CREDITS_RESERVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_credits_reserved_total", METRIC_PREFIX),
        "Credits reserved for metered sends",
        &["channel"]
    ).unwrap();

    /// Reservations lost to a concurrent decrement
    pub static ref CREDITS_RACE_LOST_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_credits_race_lost_total", METRIC_PREFIX),
        "Conditional decrements that affected no rows",
        &["channel"]
    ).unwrap();

    /// Credits returned after a failed send
    pub static ref CREDITS_REFUNDED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_credits_refunded_total", METRIC_PREFIX),
        "Credits refunded for failed deliveries",
        &["channel"]
    ).unwrap();

    // ============================================================================
    // Template Metrics
    // ============================================================================

    /// Template writes rejected for unknown variables
    pub static ref TEMPLATE_VALIDATION_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_template_validation_failures_total", METRIC_PREFIX),
        "Template create/update calls rejected by catalog validation"
    ).unwrap();

    /// Render failures by error code
    pub static ref TEMPLATE_RENDER_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_template_render_failures_total", METRIC_PREFIX),
        "Template renders that failed, by error code",
        &["code"]
    ).unwrap();

    // ============================================================================
    // Service Gauges
    // ============================================================================

    /// Postgres pool connections by state (idle, in_use)
    pub static ref POSTGRES_POOL_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_postgres_pool_connections", METRIC_PREFIX),
        "Connections held by the Postgres pool",
        &["state"]
    ).unwrap();

    /// Seconds since the server started
    pub static ref UPTIME_SECONDS: IntGauge = register_int_gauge!(
        format!("{}_uptime_seconds", METRIC_PREFIX),
        "Seconds since the server started"
    ).unwrap();
}
