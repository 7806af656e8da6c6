//! HTTP error type.
//!
//! Bridges [`RsvpError`] and rejection cases to JSON responses of the form
//! `{"code": "...", "message": "..."}`.

use crate::error::RsvpError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            source: None,
        }
    }

    /// Create a new error with a source error.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// Create a 403 Forbidden error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", message)
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }

    /// HTTP status
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<RsvpError> for AppError {
    fn from(err: RsvpError) -> Self {
        let message = err.to_string();
        match err {
            RsvpError::Validation(_) => Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message),
            RsvpError::EventNotFound(_) => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message),
            RsvpError::AlreadyRegistered { .. } => Self::new(StatusCode::CONFLICT, "ALREADY_REGISTERED", message),
            RsvpError::NotRegistered { .. } => Self::new(StatusCode::CONFLICT, "NOT_REGISTERED", message),
            RsvpError::RegistrationClosed { .. } => Self::new(StatusCode::CONFLICT, "REGISTRATION_CLOSED", message),
            RsvpError::RegistrationConflict { .. } => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "REGISTRATION_CONFLICT", message)
            },
            RsvpError::Forbidden(_) => Self::forbidden(message),
            RsvpError::ExternalService(_) => Self::new(StatusCode::BAD_GATEWAY, "EXTERNAL_SERVICE_ERROR", message),
            RsvpError::Persistence(_) => {
                Self::internal("An internal error occurred").with_source(anyhow::Error::new(err))
            },
        }
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: &'static str,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Internal server error"
                ),
                None => tracing::warn!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Request failed"
                ),
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClosedReason;
    use crate::types::EventId;

    #[test]
    fn rsvp_errors_map_to_statuses() {
        let cases = [
            (RsvpError::Validation("x".into()), StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            (RsvpError::EventNotFound(EventId::new()), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (
                RsvpError::RegistrationClosed {
                    reason: ClosedReason::DeadlinePassed,
                },
                StatusCode::CONFLICT,
                "REGISTRATION_CLOSED",
            ),
            (
                RsvpError::RegistrationConflict { attempts: 3 },
                StatusCode::SERVICE_UNAVAILABLE,
                "REGISTRATION_CONFLICT",
            ),
            (RsvpError::Forbidden("no".into()), StatusCode::FORBIDDEN, "FORBIDDEN"),
            (
                RsvpError::Persistence("down".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
            ),
        ];

        for (err, status, code) in cases {
            let app = AppError::from(err);
            assert_eq!(app.status(), status);
            assert_eq!(app.code(), code);
        }
    }

    #[test]
    fn persistence_details_are_not_exposed() {
        let err = AppError::from(RsvpError::Persistence("connection refused".into()));
        assert_eq!(err.to_string(), "[INTERNAL_SERVER_ERROR] An internal error occurred");
    }
}
