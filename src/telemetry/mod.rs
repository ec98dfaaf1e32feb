//! Tracing setup: console output always, OTLP export when `otel.enabled`.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `OTEL_ENABLED` | `false` |
//! | `OTEL_ENDPOINT` | `http://localhost:4317` |
//! | `OTEL_SERVICE_NAME` | `school-notification-engine` |
//! | `OTEL_SAMPLING_RATIO` | `1.0` |
//!
//! Dispatcher spans carry notification attributes (see [`attributes`]), so
//! a trace shows the rollup of each notify or retry call.

use opentelemetry::{trace::TracerProvider, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider as SdkTracerProvider},
    Resource,
};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::OtelConfig;

pub type TelemetryResult<T> = Result<T, TelemetryError>;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Failed to install tracing subscriber: {0}")]
    SubscriberInit(String),
    #[error("Failed to build OTLP exporter: {0}")]
    ExporterBuild(String),
}

/// Holds the tracer provider; dropping it flushes and shuts down export.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    pub fn otel_enabled(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to shut down tracer provider: {e}");
            }
        }
    }
}

/// Install the global subscriber. Keep the returned guard alive until exit.
pub fn init_telemetry(config: &OtelConfig) -> TelemetryResult<TelemetryGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let provider = if config.enabled {
        Some(build_provider(config)?)
    } else {
        None
    };
    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    if provider.is_some() {
        tracing::info!(
            endpoint = %config.endpoint,
            service_name = %config.service_name,
            sampling_ratio = config.sampling_ratio,
            "OTLP trace export enabled"
        );
    } else {
        tracing::info!("Tracing initialized without OTLP export");
    }

    Ok(TelemetryGuard { provider })
}

/// Sampler for a configured ratio; out-of-range values clamp to always/never.
fn sampler_for(ratio: f64) -> Sampler {
    if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    }
}

fn build_provider(config: &OtelConfig) -> TelemetryResult<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.endpoint)
        .build()
        .map_err(|e| TelemetryError::ExporterBuild(e.to_string()))?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(sampler_for(config.sampling_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(Resource::new(vec![
            KeyValue::new(SERVICE_NAME, config.service_name.clone()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        ]))
        .build())
}

/// Notification attributes recorded on dispatcher spans.
pub mod attributes {
    use tracing::Span;

    use crate::notification::{DeliveryStatus, NotificationOutcome};

    /// Per-status row counts of one notification
    #[derive(Debug, Default, PartialEq, Eq)]
    pub struct DeliveryCounts {
        pub sent: u64,
        pub failed: u64,
        pub skipped: u64,
        pub pending: u64,
    }

    impl DeliveryCounts {
        pub fn of(outcome: &NotificationOutcome) -> Self {
            let mut counts = Self::default();
            for delivery in &outcome.deliveries {
                let slot = match delivery.status {
                    DeliveryStatus::Sent => &mut counts.sent,
                    DeliveryStatus::Failed => &mut counts.failed,
                    DeliveryStatus::Skipped => &mut counts.skipped,
                    DeliveryStatus::Pending => &mut counts.pending,
                };
                *slot += 1;
            }
            counts
        }
    }

    /// Record `notification.id`, `overall`, `sent`, `failed` and `skipped`
    /// on `span`. Fields the span did not declare are ignored.
    pub fn record_outcome(span: &Span, outcome: &NotificationOutcome) {
        let counts = DeliveryCounts::of(outcome);
        span.record("notification.id", tracing::field::display(outcome.notification.id));
        span.record("overall", outcome.overall.as_str());
        span.record("sent", counts.sent);
        span.record("failed", counts.failed);
        span.record("skipped", counts.skipped);
    }
}
