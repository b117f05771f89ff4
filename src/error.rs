//! Error types for the footprint service.
//!
//! Two layers: [`FetchError`] covers a single outbound request (transport,
//! HTTP status, body decoding) and [`AppError`] is what handlers and the
//! sync job return. Every variant renders a message that names the failing
//! URL or operation so it can be shown to the operator verbatim.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Message used when a transport failure carries no description of its own.
pub const UNKNOWN_NETWORK_ERROR: &str = "unknown network error";

/// Failure of one outbound request made through the request cache.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The remote answered with a non-2xx status.
    #[error("request failed with status {status} for {url}")]
    Status { status: String, url: String },

    /// The body was not valid JSON or did not match the expected shape.
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// The request never produced a response (DNS, connect, timeout, ...).
    #[error("{message} ({url})")]
    Transport { url: String, message: String },
}

impl FetchError {
    /// Normalizes any transport-level failure into a [`FetchError::Transport`].
    pub fn transport(url: &str, err: impl std::fmt::Display) -> Self {
        let message = err.to_string();
        let message = if message.trim().is_empty() {
            UNKNOWN_NETWORK_ERROR.to_string()
        } else {
            message
        };
        Self::Transport {
            url: url.to_string(),
            message,
        }
    }
}

/// Service-level error type.
///
/// `#[from]` conversions let the `?` operator lift io, JSON, HTTP-client and
/// polars errors without manual mapping.
#[derive(Debug, Error)]
pub enum AppError {
    /// Error reading or writing the mirror or settings files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error encoding or parsing persisted JSON.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Error building the HTTP client.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// The configured API key cannot be used as a header value.
    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    /// An outbound registry or IRR request failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Aggregation over the mirror failed.
    #[error("Analytics error: {0}")]
    Analytics(#[from] polars::prelude::PolarsError),

    #[error("{0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Fetch(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
