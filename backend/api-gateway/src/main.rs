use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use api_gateway::cache::{CarCache, RedisCarCache};
use api_gateway::handlers::{self, AppState};
use api_gateway::{Config, CorrelationEngine, EngineSettings};
use broker_client::{BrokerHealth, KafkaBroker, KafkaSettings, Publisher};
use opentelemetry_config::{init_tracing, shutdown_tracing, TracingConfig};
use redis_utils::RedisPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;

const STARTUP_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// API gateway
///
/// # Routes
///
/// - `GET|PUT|PATCH|DELETE /myapi/{id}` - car CRUD relayed to the data processor
/// - `GET /health` - liveness
/// - `GET /health/ready` - Redis, Kafka and response reader status
#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let _tracer = init_tracing(
        "api-gateway",
        "api_gateway=debug",
        TracingConfig::from_env(false),
    )?;

    let config = Config::from_env()
        .map_err(anyhow::Error::msg)
        .context("failed to load configuration")?;

    info!("Starting api-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.env);

    let redis = RedisPool::connect(&config.cache.url).await?;
    match redis.ping().await {
        Ok(()) => info!("Redis health check passed"),
        Err(e) => warn!(error = %e, "Redis health check failed; serving without cache hits"),
    }
    let cache: Arc<dyn CarCache> = Arc::new(RedisCarCache::new(redis));

    let broker = KafkaBroker::connect(KafkaSettings::new(&config.kafka.brokers))?;
    match broker.health_check(STARTUP_CHECK_TIMEOUT).await {
        Ok(()) => info!("Kafka health check passed"),
        Err(e) => error!(error = %e, "Kafka health check failed"),
    }
    broker
        .ensure_topics(&[&config.kafka.request_topic, &config.kafka.response_topic])
        .await
        .context("failed to ensure Kafka topics")?;

    let publisher: Arc<dyn Publisher> = Arc::new(broker.clone());
    let engine = Arc::new(
        CorrelationEngine::start(
            publisher.clone(),
            &broker,
            EngineSettings {
                request_topic: config.kafka.request_topic.clone(),
                response_topic: config.kafka.response_topic.clone(),
                response_group_id: config.kafka.response_group_id(),
                response_offset_reset: config.kafka.response_offset_reset,
                publish_retry: config.kafka.publish_retry(),
                call_timeout: config.kafka.call_timeout(),
            },
        )
        .await
        .context("failed to start correlation engine")?,
    );

    let state = web::Data::new(AppState::new(
        engine.clone(),
        cache,
        Arc::new(broker) as Arc<dyn BrokerHealth>,
    ));

    let bind_address = (config.app.host.clone(), config.app.port);
    info!("Starting HTTP server at {}:{}", bind_address.0, bind_address.1);

    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(state.clone())
            .configure(handlers::configure)
    })
    .bind(bind_address)?
    .shutdown_timeout(10)
    .run()
    .await?;

    info!("HTTP server stopped, shutting down");
    engine.shutdown();
    if let Err(e) = publisher.flush(FLUSH_TIMEOUT).await {
        warn!(error = %e, "Producer flush failed");
    }
    shutdown_tracing();

    Ok(())
}
