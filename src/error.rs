//! Error types for Georoute
//!
//! All errors implement `IntoResponse` for Axum handlers.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("unknown client region: {0}")]
    UnknownRegion(String),

    #[error("no available server found")]
    NoServerAvailable,

    #[error("no available backup server")]
    NoBackupAvailable,

    #[error("no servers available")]
    AllServersFailed,

    #[error("server {node_id} unreachable: {reason}")]
    BackendUnavailable { node_id: String, reason: String },

    #[error("server {node_id} timeout after {timeout_ms} ms")]
    BackendTimeout { node_id: String, timeout_ms: u64 },

    #[error("client request stream failed: {0}")]
    ClientStream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_)
            | Self::MissingHeader(_)
            | Self::UnknownRegion(_)
            | Self::ClientStream(_) => StatusCode::BAD_REQUEST,
            Self::NoServerAvailable | Self::NoBackupAvailable | Self::AllServersFailed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::BackendUnavailable { .. } => StatusCode::BAD_GATEWAY,
            Self::BackendTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(serde_json::json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;
