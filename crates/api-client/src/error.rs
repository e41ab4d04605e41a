// In crates/api-client/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to build the API client: {0}")]
    ClientBuildError(String),
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(#[from] serde_json::Error),
    #[error("API error: code {code}, msg: {msg}")]
    ApiError { code: i64, msg: String },
}

impl Error {
    /// Whether retrying the same request may succeed. Network failures and
    /// exchange-side overload codes are transient; rejections are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::RequestFailed(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            // -1001 disconnected, -1003 rate limited, -1007 backend timeout, -1008 overloaded
            Error::ApiError { code, .. } => matches!(code, -1001 | -1003 | -1007 | -1008),
            Error::ClientBuildError(_) | Error::DeserializationFailed(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
