//! API error taxonomy and HTTP mapping.
//!
//! Every error response carries a machine-readable `kind` plus a
//! human-readable `message` in a uniform `{"error": {...}}` envelope, so
//! clients can branch on kind without parsing prose.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use beacon_incidents::StoreError;
use beacon_types::{FieldError, IncidentStatus};
use serde_json::json;

/// Errors surfaced by the HTTP API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request payload failed validation. Storage was never touched.
    #[error("validation failed")]
    Validation(Vec<FieldError>),

    /// The referenced incident does not exist.
    #[error("incident not found: {0}")]
    NotFound(String),

    /// The requested status update violates the lifecycle state machine.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: IncidentStatus,
        to: IncidentStatus,
    },

    /// The incident store is unavailable or timed out.
    #[error("storage unavailable: {0}")]
    Storage(String),

    /// An unexpected internal failure (task join errors and the like).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Machine-readable error kind for the response envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Storage(_) => "storage",
            Self::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Validation(fields) => Self::Validation(fields),
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
            StoreError::Database(_) | StoreError::Pool(_) => Self::Storage(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Storage and internal failures are operational problems; log them
        // server-side with detail, return only the sanitized message.
        match &self {
            ApiError::Storage(msg) => tracing::error!(error = %msg, "storage failure"),
            ApiError::Internal(msg) => tracing::error!(error = %msg, "internal failure"),
            _ => {}
        }

        let mut error = json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        if let ApiError::Validation(fields) = &self {
            error["fields"] = json!(fields);
        }

        let mut response = (self.status(), Json(json!({ "error": error }))).into_response();
        if matches!(self, ApiError::Storage(_)) {
            response.headers_mut().insert(
                axum::http::header::RETRY_AFTER,
                axum::http::HeaderValue::from_static("1"),
            );
        }
        response
    }
}
