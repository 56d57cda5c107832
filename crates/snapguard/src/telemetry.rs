//! Logging and OpenTelemetry initialization for snapguard.
//!
//! `serve` always logs through the fmt layer. When an OTLP endpoint is
//! configured, traces, logs and metrics are also exported over gRPC.

use std::time::Duration;

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};
use opentelemetry_sdk::Resource;
use snapconf::TelemetryConfig;
use snapstore::NodeId;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Timeout for OTLP exports - prevents blocking on unavailable endpoints
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Plain fmt logging, used by the CLI subcommands.
pub fn init_fmt(log_level: &str) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Initialize logging for the guard, with OTLP export when configured.
pub fn init(config: &TelemetryConfig, node_id: NodeId) -> Result<()> {
    if !config.otlp_enabled() {
        init_fmt(&config.log_level);
        return Ok(());
    }

    let resource = Resource::builder_empty()
        .with_service_name("snapguard")
        .with_attributes(vec![
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("service.instance.id", format!("node-{}", node_id)),
            KeyValue::new("snapguard.node_id", i64::from(node_id)),
        ])
        .build();

    let endpoint = if config.otlp_endpoint.starts_with("http") {
        config.otlp_endpoint.clone()
    } else {
        format!("http://{}", config.otlp_endpoint)
    };

    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP span exporter")?;

    let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_span_processor(
            opentelemetry_sdk::trace::BatchSpanProcessor::builder(trace_exporter).build(),
        )
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();

    let tracer = tracer_provider.tracer("snapguard");
    global::set_tracer_provider(tracer_provider);

    let log_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP log exporter")?;

    let logger_provider = opentelemetry_sdk::logs::SdkLoggerProvider::builder()
        .with_log_processor(
            opentelemetry_sdk::logs::BatchLogProcessor::builder(log_exporter).build(),
        )
        .with_resource(resource.clone())
        .build();

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP metric exporter")?;

    let meter_provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_reader(opentelemetry_sdk::metrics::PeriodicReader::builder(metric_exporter).build())
        .with_resource(resource)
        .build();

    global::set_meter_provider(meter_provider);

    let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let log_appender =
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&logger_provider);

    tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .with(log_appender)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(endpoint = %config.otlp_endpoint, "OpenTelemetry initialized");
    Ok(())
}

/// Providers flush on drop within the export timeout.
pub fn shutdown() {
    tracing::info!("Shutting down OpenTelemetry");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_falls_back() {
        // An unparsable directive still yields a usable filter
        let _ = env_filter("info,[=");
        let _ = env_filter("debug,snapguard=trace");
    }
}
