//! Error types for block-ddos.

use thiserror::Error;

/// Main error type for block-ddos operations.
///
/// Every variant is a setup-time failure. Blocking a request is a normal
/// outcome and is reported through [`crate::middleware::Decision`] instead.
#[derive(Error, Debug)]
pub enum BlockError {
    /// `window_ms` was present but not a number
    #[error("The time interval must be a number")]
    InvalidWindowType,

    /// `window_ms` below the enforced floor
    #[error("The time interval must be greater than or equal to {floor}ms (got {actual}ms)")]
    WindowBelowFloor { actual: u64, floor: u64 },

    /// `max_attempts` was present but not an integer
    #[error("The attempts param must be a positive number")]
    InvalidAttemptsType,

    /// `max_attempts` outside the inclusive range
    #[error("The attempts param must be between {min} and {max} (got {actual})")]
    AttemptsOutOfRange { actual: i64, min: u32, max: u32 },

    /// Any other configuration problem
    #[error("Configuration error: {0}")]
    Config(String),

    /// A shared store was handed to a guard configured with a different ceiling
    #[error("Store already initialized with max_attempts={store}, refusing max_attempts={requested}")]
    StoreMismatch { store: u32, requested: u32 },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for block-ddos operations.
pub type Result<T> = std::result::Result<T, BlockError>;
