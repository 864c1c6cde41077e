//! Error responses for the control API.
//!
//! Every failure is rendered as `{"code": "...", "message": "..."}` with a
//! matching status. Domain errors the client can act on keep their message;
//! everything else is logged and answered with a generic 500.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::Error;

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// The engine is not in a state that allows the request.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// A destination or source edit failed validation.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    /// An optional subsystem (e.g. log streaming) was not wired up.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { entity_type, id } => {
                Self::not_found(format!("{entity_type} '{id}' not found"))
            }
            Error::Validation(msg) => Self::validation(msg),
            Error::Configuration(msg) => Self::bad_request(msg),
            Error::NotRunning => Self::conflict(err.to_string()),
            Error::Io(e) => {
                tracing::error!("Configuration store I/O failed: {}", e);
                Self::internal("failed to persist configuration")
            }
            other => {
                tracing::error!("Request failed: {}", other);
                Self::internal("internal error")
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_map_to_status() {
        let cases = [
            (Error::not_found("destination", "yt"), StatusCode::NOT_FOUND),
            (Error::config("no enabled destinations"), StatusCode::BAD_REQUEST),
            (Error::validation("duplicate destination"), StatusCode::UNPROCESSABLE_ENTITY),
            (Error::NotRunning, StatusCode::CONFLICT),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }

        let err = ApiError::from(Error::not_found("destination", "yt"));
        assert_eq!(err.code, "NOT_FOUND");
        assert_eq!(err.message, "destination 'yt' not found");
    }

    #[test]
    fn test_internal_errors_are_not_leaked() {
        let err = ApiError::from(Error::Other("ffmpeg exploded at /secret/path".to_string()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("secret"));
    }
}
