//! Standardized API error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Machine-readable error code for API responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    NotFound,
    BadRequest,
    InternalError,
    Unauthorized,
    Forbidden,
    Conflict,
    /// The fleet is already at `max_sessions` (spec §4.6).
    Capacity,
    /// A `Create` was requested for a session that's already connected.
    AlreadyConnected,
    /// The phone number being paired is already bound to a different session.
    PhoneOwnedByOtherSession,
    /// The caller exceeded one of the auth/pairing rate limits.
    RateLimited,
}

/// Standardized error response for all API endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Machine-readable error code
    pub code: ApiErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details (validation errors, field info, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    #[allow(dead_code)]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::BadRequest, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::InternalError, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Unauthorized, message)
    }

    pub fn capacity(max_sessions: usize) -> Self {
        Self::new(ApiErrorCode::Capacity, format!("fleet is at capacity ({max_sessions} sessions)"))
    }

    pub fn already_connected(session_id: impl std::fmt::Display) -> Self {
        Self::new(ApiErrorCode::AlreadyConnected, format!("session {session_id} is already connected"))
    }

    pub fn phone_owned_by_other_session() -> Self {
        Self::new(
            ApiErrorCode::PhoneOwnedByOtherSession,
            "this phone number is already linked to another session",
        )
    }

    pub fn rate_limited() -> Self {
        Self::new(ApiErrorCode::RateLimited, "rate limit exceeded, try again shortly")
    }

    fn status_code(&self) -> StatusCode {
        match self.code {
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ApiErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ApiErrorCode::Conflict
            | ApiErrorCode::AlreadyConnected
            | ApiErrorCode::PhoneOwnedByOtherSession => StatusCode::CONFLICT,
            ApiErrorCode::Capacity => StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

/// Convert `(StatusCode, String)` tuple errors to ApiError
impl From<(StatusCode, String)> for ApiError {
    fn from((status, message): (StatusCode, String)) -> Self {
        let code = match status {
            StatusCode::NOT_FOUND => ApiErrorCode::NotFound,
            StatusCode::BAD_REQUEST => ApiErrorCode::BadRequest,
            StatusCode::UNAUTHORIZED => ApiErrorCode::Unauthorized,
            StatusCode::FORBIDDEN => ApiErrorCode::Forbidden,
            StatusCode::CONFLICT => ApiErrorCode::Conflict,
            _ => ApiErrorCode::InternalError,
        };
        Self::new(code, message)
    }
}

/// Helper for converting database errors to ApiError
pub fn db_error(context: &str, error: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %error, context = context, "database error");
    ApiError::internal_error(format!("{context} failed"))
}

impl From<crate::core::errors::CreateError> for ApiError {
    fn from(err: crate::core::errors::CreateError) -> Self {
        use crate::core::errors::CreateError;
        match err {
            CreateError::FleetFull => ApiError::new(ApiErrorCode::Capacity, err.to_string()),
            CreateError::AlreadyInitializing(_) | CreateError::AlreadyActive(_) => {
                ApiError::new(ApiErrorCode::AlreadyConnected, err.to_string())
            }
            CreateError::ConnectionFailed(e) => db_error("session creation", e),
        }
    }
}
