use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use roxx_db::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Missing or invalid bearer token")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Store(e) => match e {
                StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                StoreError::AlreadyExists(_) => (StatusCode::CONFLICT, "already_exists"),
                StoreError::InvalidCredential => (StatusCode::UNAUTHORIZED, "invalid_credential"),
                StoreError::Suspended => (StatusCode::FORBIDDEN, "suspended"),
                StoreError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
                StoreError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "invalid_argument"),
                StoreError::IllegalTransition { .. } => (StatusCode::CONFLICT, "illegal_transition"),
                StoreError::Sqlite(_)
                | StoreError::PasswordHash(_)
                | StoreError::LockPoisoned
                | StoreError::Corrupt(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            },
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Infrastructure details stay in the log
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = serde_json::json!({
            "error": code,
            "message": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
