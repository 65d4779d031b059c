use crate::github::GithubError;
use crate::response::ApiResponse;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use deadpool_diesel::InteractError;
use deadpool_diesel::postgres::PoolError;
use diesel::result::DatabaseErrorKind;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String), // 400

    #[error("Unprocessable Entity: {0}")]
    UnprocessableEntity(String), // 422

    #[error("Database pool error: {0}")]
    PoolError(#[from] PoolError),

    #[error("Database interaction error: {0}")]
    InteractError(#[from] InteractError),

    #[error("Database query error: {0}")]
    DieselError(#[from] diesel::result::Error),

    #[error("GitHub API error: {0}")]
    Github(#[from] GithubError),

    #[error("Internal Server Error: {0}")]
    Internal(#[from] anyhow::Error), // 500
}

/// Maps constraint violations onto client-facing statuses; everything else
/// stays a generic 500.
fn diesel_error_status(err: &diesel::result::Error) -> (StatusCode, String) {
    match err {
        diesel::result::Error::NotFound => (
            StatusCode::NOT_FOUND,
            "Resource not found (database query)".to_string(),
        ),
        diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => (
            StatusCode::CONFLICT,
            format!("Duplicate record: {}", info.message()),
        ),
        diesel::result::Error::DatabaseError(DatabaseErrorKind::NotNullViolation, info) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("Missing required field: {}", info.message()),
        ),
        _ => {
            error!("Unhandled Diesel error encountered: {:?}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal server error occurred".to_string(),
            )
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            AppError::UnprocessableEntity(message) => (StatusCode::UNPROCESSABLE_ENTITY, message),

            AppError::DieselError(err) => diesel_error_status(&err),

            AppError::PoolError(source) => {
                error!("Responding with 500. Database pool error: {:?}", source);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred".to_string(),
                )
            }
            AppError::InteractError(source) => {
                error!(
                    "Responding with 500. Database interaction error: {:?}",
                    source
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred".to_string(),
                )
            }
            AppError::Github(source) => {
                error!("Responding with 500. GitHub API error: {:?}", source);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred".to_string(),
                )
            }
            AppError::Internal(source) => {
                error!(
                    "Responding with 500 Internal Server Error. Source: {:?}",
                    source
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = ApiResponse::<()> {
            status_code: status.as_u16(),
            status_message: error_message,
            data: None,
        };

        (status, body).into_response()
    }
}
