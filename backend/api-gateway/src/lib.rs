/// API gateway library
///
/// Accepts CRUD calls on cars over HTTP, answers GETs from the Redis cache
/// when it can, and otherwise relays each call over the request topic and
/// waits for the matching response.
///
/// # Modules
///
/// - `cache`: car cache trait with Redis and in-memory backends
/// - `correlation`: request/response matching over the broker
/// - `handlers`: HTTP routes and shared state
/// - `error`: HTTP error mapping
/// - `config`: environment configuration
pub mod cache;
pub mod config;
pub mod correlation;
pub mod error;
pub mod handlers;

pub use config::Config;
pub use correlation::{CallOutcome, CorrelationEngine, CorrelationError, EngineSettings};
pub use error::{AppError, Result};
