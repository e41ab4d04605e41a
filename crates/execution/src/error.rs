// In crates/execution/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Execution failed: {reason}")]
    ExecutionFailed { reason: String },

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Market data unavailable: {0}")]
    DataUnavailable(String),

    #[error("API client error: {0}")]
    ApiClientError(#[from] api_client::Error),
}

impl Error {
    /// Whether a retry of the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout { .. } | Error::DataUnavailable(_) => true,
            Error::ApiClientError(e) => e.is_transient(),
            Error::ExecutionFailed { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
