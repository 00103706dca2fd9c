use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The broker did not acknowledge in time; safe to retry
    #[error("broker operation timed out: {0}")]
    Timeout(String),

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The subscription can no longer deliver messages
    #[error("subscription disconnected: {0}")]
    Disconnected(String),

    #[error("offset commit failed: {0}")]
    Commit(String),

    #[error("broker configuration error: {0}")]
    Config(String),
}

impl BrokerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BrokerError::Timeout(_))
    }
}
