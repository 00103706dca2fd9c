use actix_web::{web, HttpResponse};
use event_schema::{Car, CarFields, CarPatch, Operation};
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use super::AppState;
use crate::correlation::CallOutcome;
use crate::error::{AppError, Result};

fn not_found(id: i64) -> AppError {
    AppError::NotFound(format!("Could not find data with ID {id}"))
}

async fn remember(state: &AppState, car: &Car) {
    if let Err(e) = state.cache.put(car).await {
        warn!(id = car.id, error = %e, "Cache write failed");
    }
}

/// Cache a GET answer unless a write or delete of `id` finished after `epoch` was read
async fn remember_if_current(state: &AppState, car: &Car, epoch: u64) {
    if state.invalidations.epoch(car.id) != epoch {
        debug!(id = car.id, "Skipping cache fill, entry changed during the call");
        return;
    }
    remember(state, car).await;

    // a delete may have landed between the check and the write
    if state.invalidations.epoch(car.id) != epoch {
        forget(state, car.id).await;
    }
}

async fn forget(state: &AppState, id: i64) {
    if let Err(e) = state.cache.invalidate(id).await {
        warn!(id, error = %e, "Cache invalidation failed");
    }
}

/// Answer a write with the authoritative document and refresh the cache
async fn stored(state: &AppState, id: i64, outcome: CallOutcome) -> Result<HttpResponse> {
    state.invalidations.bump(id);
    match outcome {
        CallOutcome::Found(car) => {
            remember(state, &car).await;
            Ok(HttpResponse::Ok().json(car))
        }
        CallOutcome::NotFound => Err(not_found(id)),
        CallOutcome::Deleted => Err(AppError::Internal(format!(
            "unexpected deletion acknowledgement for ID {id}"
        ))),
    }
}

#[instrument(name = "get_request", skip(state))]
pub async fn get_car(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse> {
    let id = path.into_inner();

    match state.cache.get(id).await {
        Ok(Some(car)) => {
            info!(id, "Serving cached car");
            return Ok(HttpResponse::Ok().json(car));
        }
        Ok(None) => {}
        Err(e) => warn!(id, error = %e, "Cache read failed, falling back to broker"),
    }

    let epoch = state.invalidations.epoch(id);
    let outcome = state
        .engine
        .call(Operation::Get, id, None, state.engine.default_timeout())
        .await?;

    match outcome {
        CallOutcome::Found(car) => {
            remember_if_current(&state, &car, epoch).await;
            Ok(HttpResponse::Ok().json(car))
        }
        CallOutcome::NotFound | CallOutcome::Deleted => Err(not_found(id)),
    }
}

#[instrument(name = "put_request", skip(state, body))]
pub async fn put_car(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<CarFields>,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    let fields = body.into_inner();
    fields.validate()?;

    let outcome = state
        .engine
        .call(
            Operation::Put,
            id,
            Some(serde_json::to_value(&fields)?),
            state.engine.default_timeout(),
        )
        .await?;

    stored(&state, id, outcome).await
}

#[instrument(name = "patch_request", skip(state, body))]
pub async fn patch_car(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<CarPatch>,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    let patch = body.into_inner();
    patch.validate()?;

    let outcome = state
        .engine
        .call(
            Operation::Patch,
            id,
            Some(serde_json::to_value(&patch)?),
            state.engine.default_timeout(),
        )
        .await?;

    stored(&state, id, outcome).await
}

#[instrument(name = "delete_request", skip(state))]
pub async fn delete_car(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse> {
    let id = path.into_inner();

    let outcome = state
        .engine
        .call(Operation::Delete, id, None, state.engine.default_timeout())
        .await?;

    // the entry is stale either way
    state.invalidations.bump(id);
    forget(&state, id).await;

    match outcome {
        CallOutcome::Deleted | CallOutcome::Found(_) => Ok(HttpResponse::NoContent().finish()),
        CallOutcome::NotFound => Err(not_found(id)),
    }
}
