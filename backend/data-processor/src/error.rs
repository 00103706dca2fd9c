use broker_client::BrokerError;
use thiserror::Error;

use crate::storage::StorageError;

/// Why a request could not be carried out. Sent back as an error payload.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failures that stop the processing loop
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}
