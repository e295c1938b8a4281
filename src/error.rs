//! Domain-specific error types for the honeypot analyzer.
//!
//! Uses `thiserror` for the core taxonomy; the CLI layer wraps everything
//! in `anyhow`.

use thiserror::Error;

/// Errors raised while computing analysis signals.
///
/// None of these escape a `detect()` or `analyze()` call: each is folded into
/// the documented fallback value for the signal it affects.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Insufficient data for analysis (need at least {required}, got {actual})")]
    InsufficientData { required: usize, actual: usize },

    #[error("Clustering failed: {0}")]
    ClusteringFailure(#[from] ClusteringError),
}

impl AnalysisError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }
}

/// Errors raised by the density-based clustering routines.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusteringError {
    #[error("Invalid clustering parameter: {0}")]
    InvalidParameter(String),

    #[error("Non-finite value at point {index}")]
    NonFiniteValue { index: usize },

    #[error("Expected {expected} weights, got {actual}")]
    WeightMismatch { expected: usize, actual: usize },
}

/// Errors raised by the result store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to serialize detection payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database connection lock poisoned")]
    LockPoisoned,

    #[error("Invalid stored value in column '{column}': {value}")]
    InvalidStoredValue { column: &'static str, value: String },
}

/// Result type alias using anyhow for application-level error handling.
pub type Result<T> = anyhow::Result<T>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
