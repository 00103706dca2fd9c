//! Logging and distributed tracing setup shared by the gateway and the data processor
//!
//! Installs a `tracing-subscriber` registry with an env filter and a fmt layer.
//! When tracing is enabled, spans are also exported over OTLP/gRPC.
//! The `carrier` module moves W3C trace context across the broker.

use opentelemetry::{global, trace::TraceError, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    runtime,
    trace::{RandomIdGenerator, Sampler, Tracer},
    Resource,
};
use tracing_subscriber::{
    filter::ParseError, fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError,
    EnvFilter, Layer,
};

pub mod carrier;
pub mod config;

pub use carrier::TraceCarrier;
pub use config::TracingConfig;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter directive: {0}")]
    Directive(#[from] ParseError),

    #[error("failed to install OTLP exporter: {0}")]
    Exporter(#[from] TraceError),

    #[error("global subscriber already installed: {0}")]
    Subscriber(#[from] TryInitError),
}

/// Initialize logging and, when enabled, OpenTelemetry tracing for a service
///
/// `default_directive` raises the level of the service's own crate,
/// e.g. `"api_gateway=debug"`. `RUST_LOG` still takes precedence for
/// everything else.
///
/// Returns the tracer when spans are exported, `None` when only logging is on.
///
/// # Example
/// ```no_run
/// use opentelemetry_config::{init_tracing, TracingConfig};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = TracingConfig::from_env(false);
///     let _tracer = init_tracing("api-gateway", "api_gateway=debug", config)?;
///     Ok(())
/// }
/// ```
pub fn init_tracing(
    service_name: &str,
    default_directive: &str,
    config: TracingConfig,
) -> Result<Option<Tracer>, TelemetryError> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive(default_directive.parse()?);

    let fmt_layer = if config.json_logs {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).with_level(true).boxed()
    };

    if !config.enabled {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
        tracing::info!(service = service_name, "Tracing export disabled");
        return Ok(None);
    }

    let resource = Resource::new(vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", config.service_version.clone()),
        KeyValue::new("deployment.environment", config.environment.clone()),
    ]);

    let tracer = init_otlp_tracer(&config, resource)?;
    let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer.clone());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(telemetry_layer)
        .try_init()?;

    tracing::info!(
        service = service_name,
        endpoint = %config.otlp_endpoint,
        sample_rate = config.sample_rate,
        "OpenTelemetry tracing initialized"
    );

    Ok(Some(tracer))
}

fn init_otlp_tracer(config: &TracingConfig, resource: Resource) -> Result<Tracer, TraceError> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(config.otlp_endpoint.clone());

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            opentelemetry_sdk::trace::config()
                .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                    config.sample_rate,
                ))))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .install_batch(runtime::Tokio)
}

/// Flush pending spans. Call before the process exits.
pub fn shutdown_tracing() {
    global::shutdown_tracer_provider();
}
