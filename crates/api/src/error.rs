use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use madmin_store::StoreError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("missing or invalid admin token")]
    Unauthorized,

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ApiError>;

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    /// Machine readable code
    code: &'static str,
    message: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            ApiError::Store(e) => match e {
                StoreError::ModuleNotFound(_) => (StatusCode::NOT_FOUND, "module_not_found"),
                StoreError::InvalidQuery(_) => (StatusCode::BAD_REQUEST, "invalid_query"),
                StoreError::InvalidTransition { .. } => {
                    (StatusCode::CONFLICT, "invalid_transition")
                }
                StoreError::ReviewConflict { .. } => (StatusCode::CONFLICT, "review_conflict"),
                e if e.is_user_error() => (StatusCode::BAD_REQUEST, "bad_request"),
                e if e.is_recoverable() => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            error: ErrorDetails {
                code,
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(error: StoreError) -> (StatusCode, &'static str) {
        ApiError::Store(error).status_and_code()
    }

    #[test]
    fn test_store_errors_map_to_statuses() {
        assert_eq!(
            status(StoreError::ModuleNotFound("x".to_string())).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(StoreError::ConfigError("bad".to_string())),
            (StatusCode::BAD_REQUEST, "bad_request")
        );
        assert_eq!(
            status(StoreError::NetworkError("timeout".to_string())),
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        );
        assert_eq!(
            status(StoreError::StaleSnapshot {
                offered: 1,
                current: 2
            })
            .0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
