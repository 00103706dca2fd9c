/// Error types for the API gateway
///
/// Every failure a handler can return maps to one HTTP status with a JSON
/// body `{ "error": ..., "status": ... }`.
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use thiserror::Error;

use crate::correlation::CorrelationError;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request body failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// The data processor rejected the request
    #[error("{0}")]
    Remote(String),

    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::Remote(_) => StatusCode::BAD_REQUEST,
            AppError::BrokerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();

        HttpResponse::build(status).json(serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }))
    }
}

impl From<CorrelationError> for AppError {
    fn from(err: CorrelationError) -> Self {
        match err {
            CorrelationError::Timeout(_) => AppError::Timeout(err.to_string()),
            CorrelationError::BrokerUnavailable(_) => AppError::BrokerUnavailable(err.to_string()),
            CorrelationError::Remote(detail) => AppError::Remote(detail),
            CorrelationError::DuplicateCorrelationId(_) | CorrelationError::Encode(_) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}
