use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use log::error;
use thiserror::Error;

use crate::response::Envelope;
use crate::store::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

pub const DUPLICATE_EMAIL: &str = "A user with this email already exists";

/// Name MongoDB gives the unique index on `users.email`.
const EMAIL_INDEX: &str = "email_1";

/// Errors surfaced to HTTP clients. Every variant renders as the standard
/// `{message, data: null}` envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed query parameters, bodies, ids or dangling references (400).
    #[error("{0}")]
    BadRequest(String),

    /// Field validation failures (400).
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// Store or transaction failures (500), message passed through as-is.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let ApiError::Internal(message) = self {
            error!("Internal error: {}", message);
        }
        HttpResponse::build(self.status_code()).json(Envelope::empty(self.to_string()))
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey(ref key) if key.contains(EMAIL_INDEX) => {
                ApiError::BadRequest(DUPLICATE_EMAIL.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(ApiError::bad_request("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Validation("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn duplicate_key_is_a_client_error() {
        let err: ApiError = StoreError::DuplicateKey("email_1 dup key".to_string()).into();
        assert!(matches!(err, ApiError::BadRequest(ref msg) if msg == DUPLICATE_EMAIL));
    }

    #[test]
    fn other_duplicate_keys_are_internal() {
        let err: ApiError = StoreError::DuplicateKey("tasks _id 64b7f0c2a1b2c3d4e5f60718".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_ne!(err.to_string(), DUPLICATE_EMAIL);
    }

    #[test]
    fn store_failures_keep_their_message() {
        let err: ApiError = StoreError::Other("connection reset".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "connection reset");
    }
}
