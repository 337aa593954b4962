use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unprocessable: {0}")]
    Unprocessable(String),
    #[error("session is full")]
    CapacityExceeded,
    #[error("session has ended")]
    SessionEnded,
    #[error("rate limited")]
    RateLimited,
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Unprocessable(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            ApiError::CapacityExceeded => (StatusCode::CONFLICT, self.to_string()),
            ApiError::SessionEnded => (StatusCode::GONE, self.to_string()),
            ApiError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate limited".to_string()),
            ApiError::Internal(err) => {
                tracing::error!("API internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message, "message": message }))).into_response()
    }
}

impl From<conclave_core::error::CoreError> for ApiError {
    fn from(e: conclave_core::error::CoreError) -> Self {
        match e {
            conclave_core::error::CoreError::NotFound => ApiError::NotFound,
            conclave_core::error::CoreError::Forbidden => ApiError::Forbidden,
            conclave_core::error::CoreError::Validation(msg) => ApiError::Unprocessable(msg),
            conclave_core::error::CoreError::CapacityExceeded => ApiError::CapacityExceeded,
            conclave_core::error::CoreError::SessionEnded => ApiError::SessionEnded,
            conclave_core::error::CoreError::Database(_) => {
                ApiError::Internal(anyhow::anyhow!("database error"))
            }
            conclave_core::error::CoreError::Internal(msg) => {
                ApiError::Internal(anyhow::anyhow!(msg))
            }
        }
    }
}

impl From<conclave_db::DbError> for ApiError {
    fn from(e: conclave_db::DbError) -> Self {
        match e {
            conclave_db::DbError::NotFound => ApiError::NotFound,
            conclave_db::DbError::Sqlx(_) => ApiError::Internal(anyhow::anyhow!("database error")),
        }
    }
}
