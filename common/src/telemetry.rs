// Telemetry module for structured logging, metrics, and tracing

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "minute-scheduler";

pub const TRIGGERS_TOTAL: &str = "scheduler_triggers_total";
pub const DISPATCH_DURATION_SECONDS: &str = "scheduler_dispatch_duration_seconds";
pub const DISPATCHERS_RETIRED_TOTAL: &str = "scheduler_dispatchers_retired_total";

/// Initialize structured logging with JSON formatting
///
/// `RUST_LOG` wins over `log_level` when set. When `tracing_endpoint` is
/// given, spans are also exported over OTLP.
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized"
    );

    Ok(())
}

fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    let tracer = tracer_provider.tracer(SERVICE_NAME);

    tracing::info!(endpoint = endpoint, "OpenTelemetry tracer initialized");

    Ok(tracer)
}

/// Flush remaining spans on shutdown
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Install the Prometheus exporter and describe the scheduler metrics
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(TRIGGERS_TOTAL, "Triggers sent to the worker, by outcome");
    describe_histogram!(
        DISPATCH_DURATION_SECONDS,
        "Time spent waiting for the worker to acknowledge a trigger"
    );
    describe_counter!(
        DISPATCHERS_RETIRED_TOTAL,
        "Dispatchers shut down after being replaced"
    );

    tracing::info!(metrics_port = metrics_port, "Prometheus metrics exporter initialized");

    Ok(())
}

#[inline]
pub fn record_trigger_success(dispatcher: &str, elapsed: Duration) {
    counter!(TRIGGERS_TOTAL, "dispatcher" => dispatcher.to_string(), "outcome" => "success")
        .increment(1);
    histogram!(DISPATCH_DURATION_SECONDS, "dispatcher" => dispatcher.to_string())
        .record(elapsed.as_secs_f64());
}

#[inline]
pub fn record_trigger_failure(dispatcher: &str, reason: &'static str, elapsed: Duration) {
    counter!(
        TRIGGERS_TOTAL,
        "dispatcher" => dispatcher.to_string(),
        "outcome" => "failure",
        "reason" => reason
    )
    .increment(1);
    histogram!(DISPATCH_DURATION_SECONDS, "dispatcher" => dispatcher.to_string())
        .record(elapsed.as_secs_f64());
}

#[inline]
pub fn record_dispatcher_retired(dispatcher: &str) {
    counter!(DISPATCHERS_RETIRED_TOTAL, "dispatcher" => dispatcher.to_string()).increment(1);
}
