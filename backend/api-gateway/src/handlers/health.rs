use actix_web::{web, HttpResponse};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::AppState;

const CHECK_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Serialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
enum ComponentStatus {
    Healthy,
    Unhealthy,
}

#[derive(Serialize)]
struct ComponentCheck {
    status: ComponentStatus,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<u64>,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    status: ComponentStatus,
    checks: HashMap<String, ComponentCheck>,
}

fn check<E: std::fmt::Display>(
    result: Result<(), E>,
    started: Instant,
    ok: &str,
    failed: &str,
) -> ComponentCheck {
    let latency_ms = Some(started.elapsed().as_millis() as u64);
    match result {
        Ok(()) => ComponentCheck {
            status: ComponentStatus::Healthy,
            message: ok.to_string(),
            latency_ms,
        },
        Err(e) => ComponentCheck {
            status: ComponentStatus::Unhealthy,
            message: format!("{failed}: {e}"),
            latency_ms,
        },
    }
}

pub async fn liveness() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "api-gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Redis PING, broker metadata, and the response reader
pub async fn readiness(state: web::Data<AppState>) -> HttpResponse {
    let mut checks = HashMap::new();

    let start = Instant::now();
    let redis = state.cache.ping().await;
    checks.insert(
        "redis".to_string(),
        check(redis, start, "Redis ping successful", "Redis ping failed"),
    );

    let start = Instant::now();
    let kafka = state.broker.health_check(CHECK_TIMEOUT).await;
    checks.insert(
        "kafka".to_string(),
        check(kafka, start, "Kafka metadata fetched", "Kafka metadata fetch failed"),
    );

    let reader = if state.engine.is_running() {
        Ok(())
    } else {
        Err("stopped")
    };
    checks.insert(
        "response_reader".to_string(),
        check(reader, Instant::now(), "Response reader running", "Response reader"),
    );

    let ready = checks
        .values()
        .all(|c| c.status == ComponentStatus::Healthy);
    let response = ReadinessResponse {
        ready,
        status: if ready {
            ComponentStatus::Healthy
        } else {
            ComponentStatus::Unhealthy
        },
        checks,
    };

    if ready {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}
