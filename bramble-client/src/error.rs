//! Error types for the Bramble cluster client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the cluster
#[derive(Debug, Error)]
pub enum ClientError {
    /// Request never produced an API response
    #[error("Cluster request failed: {0}")]
    RequestFailed(#[source] kube::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Create of a resource whose name is already taken
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Write based on a stale resource version
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Invalid or missing connection settings
    #[error("Invalid cluster configuration: {0}")]
    ConfigError(String),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if this error reports that a created resource already exists
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// Check if this error is an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }
}

/// Classifies API responses by status code and reason
///
/// The API server answers both a taken name and a stale write with 409;
/// only the `AlreadyExists` reason tells them apart.
impl From<kube::Error> for ClientError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => match (response.code, response.reason.as_str()) {
                (404, _) => Self::NotFound(response.message),
                (409, "AlreadyExists") => Self::AlreadyExists(response.message),
                (409, _) => Self::Conflict(response.message),
                (status, _) => Self::ApiError {
                    status,
                    message: response.message,
                },
            },
            kube::Error::SerdeError(e) => Self::ParseError(e.to_string()),
            other => Self::RequestFailed(other),
        }
    }
}
