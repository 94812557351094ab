//! Error types for the Request Guard agent.

use std::time::Duration;
use thiserror::Error;

/// Failure of a counter or block-list backend.
///
/// Never surfaced to HTTP clients: callers log it and fail open.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached or rejected the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend did not answer within the configured bound
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Invalid configuration value.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("limit for class '{0}' must be positive")]
    InvalidLimit(String),

    #[error("window for '{0}' must be between 1 second and one year")]
    InvalidWindow(String),

    #[error("authenticated multiplier must be positive")]
    InvalidMultiplier,

    #[error("auto-block threshold must be positive")]
    InvalidThreshold,

    #[error("auto-block duration must be between 1 second and one year")]
    InvalidBlockDuration,

    #[error("alert queue capacity must be positive")]
    InvalidQueueCapacity,
}
