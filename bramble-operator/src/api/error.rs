//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bramble_client::ClientError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    ClusterError(ClientError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::ClusterError(err) if err.is_not_found() => {
                (StatusCode::NOT_FOUND, err.to_string())
            }
            ApiError::ClusterError(err) => {
                tracing::error!("Cluster error: {}", err);
                (
                    StatusCode::BAD_GATEWAY,
                    "Cluster API request failed".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        ApiError::ClusterError(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
