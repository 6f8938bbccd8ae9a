use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use anky_core::ledger::LedgerError;

/// Request-level errors with structured JSON bodies.
///
/// Admission denials (402/429) carry bespoke bodies and are built where
/// they occur; this type covers everything else. Only `Internal` surfaces
/// as a 500 and is logged as an error — every other branch is an expected
/// outcome.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("Transaction hash already used")]
    ReplayedTransaction,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            // The UNIQUE insert losing a race is a replay, not a failure.
            LedgerError::DuplicateTxHash => Self::ReplayedTransaction,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ReplayedTransaction => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match &self {
            Self::Internal(reason) => tracing::error!(reason = %reason, "request failed"),
            Self::ReplayedTransaction => tracing::warn!("replayed transaction hash"),
            _ => tracing::info!(error = %self, "request rejected"),
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
