use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Authentication error: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{0}")]
    DomainRule(String),

    #[error("Storage error: {0}")]
    Storage(sqlx::Error),

    #[error("Storage deadline exceeded")]
    StorageTimeout,

    #[error("Internal server error")]
    Internal,
}

/// Map sqlx errors to AppError, with special handling for unique-constraint
/// violations (SQLite extended result codes 1555 / 2067) so they surface as
/// 409 Conflict rather than 500 Internal Server Error.
impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = e {
            if matches!(db_err.code().as_deref(), Some("1555") | Some("2067")) {
                return AppError::Conflict("Resource already exists".into());
            }
        }
        AppError::Storage(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message): (StatusCode, String) = match self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::DomainRule(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Storage(e) => {
                tracing::error!("Storage error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".into())
            }
            AppError::StorageTimeout => {
                tracing::error!("Storage deadline exceeded");
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".into())
            }
            AppError::Internal => {
                tracing::error!("Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".into(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
