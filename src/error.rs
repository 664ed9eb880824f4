//! Error module for the Rusty Tau library.
use thiserror::Error;

/// Error types for the library.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum TauError {
    /// Error for a channel key that is not part of the data set.
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),
    /// Error for unusable raw samples, e.g., empty, non-finite or constant traces.
    #[error("Invalid trace: {0}")]
    InvalidTrace(String),
    /// Degenerate data, e.g., a flat window that cannot be normalized.
    #[error("Degenerate data: {0}")]
    DegenerateData(String),
    /// Too few samples for the requested operation.
    #[error("Insufficient samples: {0}")]
    InsufficientSamples(String),
    /// Boundary indices that are out of range or not strictly increasing.
    #[error("Invalid indices: {0}")]
    InvalidIndices(String),
    /// NaN or infinite values where finite numbers are required.
    #[error("Non-finite input: {0}")]
    NonFiniteInput(String),
    /// Operation not permitted in the current state.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    /// Error for invalid parameters.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// A boundary time that is not an element of the channel's time axis.
    #[error("Time {0} is not a sample of the time axis")]
    TimeNotOnAxis(f64),
    /// Error for I/O operations, including (de)serialization.
    #[error("I/O error: {0}")]
    IOError(String),
}

impl TauError {
    /// Returns true for the recoverable degenerate-data conditions.
    /// A degenerate fit still produces an event; every other error is fatal for the operation.
    pub fn is_degenerate(&self) -> bool {
        matches!(
            self,
            TauError::DegenerateData(_) | TauError::InsufficientSamples(_)
        )
    }
}

impl From<std::io::Error> for TauError {
    fn from(e: std::io::Error) -> Self {
        TauError::IOError(e.to_string())
    }
}

impl From<serde_json::Error> for TauError {
    fn from(e: serde_json::Error) -> Self {
        TauError::IOError(e.to_string())
    }
}

impl From<csv::Error> for TauError {
    fn from(e: csv::Error) -> Self {
        TauError::IOError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TauError>;
