use anyhow::{Context, Result};
use broker_client::{BrokerHealth, KafkaBroker, KafkaSettings, Publisher};
use data_processor::storage::PgCarRepository;
use data_processor::{Config, RequestProcessor};
use db_pool::{close_pool, create_pool};
use opentelemetry_config::{init_tracing, shutdown_tracing, TracingConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let _tracer = init_tracing(
        "data-processor",
        "data_processor=debug",
        TracingConfig::from_env(true),
    )?;

    let config = Config::from_env()
        .map_err(anyhow::Error::msg)
        .context("failed to load configuration")?;

    info!("Starting data-processor v{}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.env);

    let pool = create_pool(&config.database)
        .await
        .context("failed to connect to PostgreSQL")?;
    let repository = PgCarRepository::new(pool.clone());
    repository
        .ensure_schema()
        .await
        .context("failed to prepare cars table")?;

    let broker = KafkaBroker::connect(KafkaSettings::new(&config.kafka.brokers))?;
    match broker.health_check(Duration::from_secs(5)).await {
        Ok(()) => info!("Kafka health check passed"),
        Err(e) => error!(error = %e, "Kafka health check failed"),
    }
    broker
        .ensure_topics(&[&config.kafka.request_topic, &config.kafka.response_topic])
        .await
        .context("failed to ensure Kafka topics")?;

    let processor = RequestProcessor::new(
        Arc::new(repository),
        Arc::new(broker.clone()),
        config.kafka.processor_settings(),
    );
    let subscription = processor
        .subscribe(&broker)
        .await
        .context("failed to subscribe to request topic")?;

    let outcome = tokio::select! {
        result = processor.run(subscription) => result,
        _ = shutdown_signal() => Ok(()),
    };

    if let Err(e) = &outcome {
        error!(error = %e, "Request processor stopped");
    }

    info!("Shutting down data-processor");
    if let Err(e) = broker.flush(FLUSH_TIMEOUT).await {
        warn!(error = %e, "Producer flush failed");
    }
    close_pool(&pool).await;
    shutdown_tracing();

    outcome.context("request processor failed")
}
