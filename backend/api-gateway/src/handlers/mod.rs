/// HTTP handlers for the API gateway
///
/// - `cars`: `/myapi/{id}` CRUD routed through the cache and the correlation engine
/// - `health`: liveness and readiness endpoints
pub mod cars;
pub mod health;

use actix_web::web;
use broker_client::BrokerHealth;
use std::sync::Arc;

use crate::cache::{CarCache, Invalidations};
use crate::correlation::CorrelationEngine;
use crate::error::AppError;

/// Shared state handed to every handler
pub struct AppState {
    pub engine: Arc<CorrelationEngine>,
    pub cache: Arc<dyn CarCache>,
    pub broker: Arc<dyn BrokerHealth>,
    invalidations: Invalidations,
}

impl AppState {
    pub fn new(
        engine: Arc<CorrelationEngine>,
        cache: Arc<dyn CarCache>,
        broker: Arc<dyn BrokerHealth>,
    ) -> Self {
        Self {
            engine,
            cache,
            broker,
            invalidations: Invalidations::new(),
        }
    }
}

/// Register all routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    let json_config = web::JsonConfig::default()
        .error_handler(|err, _req| AppError::Validation(err.to_string()).into());

    cfg.app_data(json_config)
        .service(
            web::resource("/myapi/{id}")
                .route(web::get().to(cars::get_car))
                .route(web::put().to(cars::put_car))
                .route(web::patch().to(cars::patch_car))
                .route(web::delete().to(cars::delete_car)),
        )
        .route("/health", web::get().to(health::liveness))
        .route("/health/ready", web::get().to(health::readiness));
}
