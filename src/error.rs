//! Error types for the library API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Stable error codes returned in every error body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthorized = 2,
    Forbidden = 3,
    DbFailure = 4,
    NoSuchUser = 5,
    NoSuchBook = 6,
    Duplicate = 7,
    BadValue = 8,
    Configuration = 9,
}

/// Failures of the token issuer, the session refresh protocol and the access gate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid access token: {0}")]
    InvalidToken(String),

    #[error("no refresh token presented")]
    NoSession,

    #[error("refresh token is not recognized")]
    UnknownSession,

    #[error("refresh token expired")]
    ExpiredSession,

    #[error("role '{0}' is not allowed for this resource")]
    ForbiddenRole(String),

    #[error("session storage failure: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Email error: {0}")]
    Email(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

impl From<redis::RedisError> for AppError {
    fn from(error: redis::RedisError) -> Self {
        AppError::Queue(error.to_string())
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

fn auth_error_parts(error: &AuthError) -> (StatusCode, ErrorCode, String) {
    match error {
        AuthError::InvalidToken(_)
        | AuthError::NoSession
        | AuthError::UnknownSession
        | AuthError::ExpiredSession => (
            StatusCode::UNAUTHORIZED,
            ErrorCode::NotAuthorized,
            "missing or invalid token".to_string(),
        ),
        AuthError::ForbiddenRole(_) => (
            StatusCode::FORBIDDEN,
            ErrorCode::Forbidden,
            "forbidden".to_string(),
        ),
        AuthError::Storage(detail) => {
            tracing::error!("Session storage error: {}", detail);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::DbFailure,
                "Internal server error".to_string(),
            )
        }
        AuthError::Configuration(detail) => {
            tracing::error!("Auth configuration error: {}", detail);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::Configuration,
                "Internal server error".to_string(),
            )
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        AppError::Auth(self).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::Auth(error) => auth_error_parts(error),
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, ErrorCode::NoSuchBook, msg.clone())
            }
            AppError::UserNotFound(msg) => {
                (StatusCode::NOT_FOUND, ErrorCode::NoSuchUser, msg.clone())
            }
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::DbFailure,
                    "Database error".to_string(),
                )
            }
            AppError::Conflict(msg) => {
                (StatusCode::CONFLICT, ErrorCode::Duplicate, msg.clone())
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::Queue(msg) | AppError::Email(msg) | AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Failure,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
