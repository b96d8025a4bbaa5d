//! Error types for the Gatekeep service.

use thiserror::Error;

use crate::store::StoreError;

/// Message returned to throttled clients.
pub const RATE_LIMITED_MESSAGE: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// Main error type for Gatekeep operations.
#[derive(Error, Debug)]
pub enum GatekeepError {
    /// The identity exceeded its quota or is serving a block.
    #[error("{}", RATE_LIMITED_MESSAGE)]
    RateLimited,

    /// The state store failed; never to be confused with a throttling decision.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatekeepError {
    /// Whether this error is a deliberate throttling decision.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GatekeepError::RateLimited)
    }
}

/// Result type alias for Gatekeep operations.
pub type Result<T> = std::result::Result<T, GatekeepError>;
