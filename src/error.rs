//! Error handling for the 2PC node
//!
//! A unified error type shared by the coordinator and participant roles.
//! HTTP handlers convert it into a JSON body via `IntoResponse`; the 2PC
//! driver and participant service never let it escape as an exception —
//! it is translated into a vote or a terminal status instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid settings at startup. Fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation routed to a node that doesn't hold that role.
    #[error("role error: {0}")]
    Role(String),

    /// Unknown node id, bad participant role, negative amount, missing URL.
    #[error("validation error: {0}")]
    Validation(String),

    /// Transaction or account row absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Prepare or lock-acquire deadline exceeded.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// HTTP connectivity or non-2xx response during 2PC.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Underlying database failure.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Serialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn role<S: Into<String>>(msg: S) -> Self {
        Self::Role(msg.into())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status code for this error, per the error-kind table.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Role(_) => StatusCode::FORBIDDEN,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::Transport(_) => StatusCode::BAD_GATEWAY,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Serialization(_) => StatusCode::BAD_REQUEST,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error category for logging/metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Role(_) => "role",
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::Timeout(_) => "timeout",
            Error::Transport(_) => "transport",
            Error::Storage(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let category = self.category();
        let message = self.to_string();

        tracing::error!(error = %self, category, %status, "request failed");

        let body = Json(json!({
            "error": {
                "code": status.as_u16(),
                "category": category,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Error::Internal(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_error_kind_table() {
        assert_eq!(Error::role("x").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(Error::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(Error::timeout("x").status_code(), StatusCode::REQUEST_TIMEOUT);
    }

    #[test]
    fn categories_are_stable_strings() {
        assert_eq!(Error::validation("x").category(), "validation");
        assert_eq!(Error::internal("x").category(), "internal");
    }
}
