// In crates/web-server/src/error.rs

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to bind server address: {0}")]
    ServerBindError(#[source] std::io::Error),

    #[error("Server stopped unexpectedly: {0}")]
    ServeError(#[source] std::io::Error),

    /// The decision loop is gone and cannot take commands.
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::EngineUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::ServerBindError(_) | Error::ServeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::warn!(error = %self, %status, "Request failed.");
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
