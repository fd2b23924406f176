//! Error types for SockJS server operations

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use ras_sockjs_types::SockJsError;
use thiserror::Error;

/// Server-specific errors
#[derive(Debug, Error)]
pub enum ServerError {
    /// Another application already owns the prefix
    #[error("An application is already installed at prefix '{0}'")]
    DuplicatePrefix(String),

    /// Configuration rejected at install time
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Session layer error
    #[error(transparent)]
    Protocol(#[from] SockJsError),

    /// Request does not map to any endpoint
    #[error("Not found")]
    NotFound,

    /// Endpoint exists but not for this method
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// Upgrade requested on something that is not a WebSocket handshake
    #[error("Can \"Upgrade\" only to \"WebSocket\".")]
    UpgradeRequired,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl ServerError {
    /// Convert to the HTTP status the protocol answers with
    pub fn to_status_code(&self) -> StatusCode {
        match self {
            ServerError::Protocol(SockJsError::UnknownSession(_))
            | ServerError::Protocol(SockJsError::SessionClosed(_))
            | ServerError::Protocol(SockJsError::UnknownTransport(_))
            | ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ServerError::UpgradeRequired => StatusCode::BAD_REQUEST,
            ServerError::Protocol(SockJsError::PermissionDenied(_)) => StatusCode::FORBIDDEN,
            ServerError::DuplicatePrefix(_)
            | ServerError::InvalidConfig(_)
            | ServerError::Protocol(_)
            | ServerError::SerializationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.to_status_code();
        let body = match &self {
            ServerError::NotFound | ServerError::Protocol(SockJsError::UnknownSession(_)) => {
                String::new()
            }
            other => other.to_string(),
        };
        let mut response = (status, body).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=UTF-8"),
        );
        response
    }
}

/// Convenience type alias for server operation results
pub type ServerResult<T> = Result<T, ServerError>;
