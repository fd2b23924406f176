//! Bridge error types

use ras_sockjs_server::ServerError;
use ras_sockjs_types::SockJsError;
use thiserror::Error;

/// Errors raised while bridging a socket to the bus
///
/// Client-caused variants are reported back over the socket as error frames
/// carrying [`BridgeError::code`]; they never close the socket.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Invalid message type: {0}")]
    InvalidType(String),

    #[error("Access denied to '{0}'")]
    AccessDenied(String),

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Handler limit of {0} reached")]
    MaxHandlersReached(usize),

    #[error("Address longer than {0} characters")]
    MaxAddressLengthReached(usize),

    #[error("Authorisation timed out")]
    AuthTimeout,

    #[error("No handlers for address '{0}'")]
    NoHandlers(String),

    #[error("Reply timed out on '{0}'")]
    ReplyTimeout(String),

    /// Permission rule that cannot be compiled
    #[error("Invalid permission rule: {0}")]
    InvalidRule(String),

    #[error(transparent)]
    Server(#[from] ServerError),
}

impl BridgeError {
    /// Error code sent to the client in `{"type":"err","body":<code>}`
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::InvalidJson(_) => "invalid_json",
            BridgeError::InvalidType(_) => "invalid_type",
            BridgeError::AccessDenied(_) => "access_denied",
            BridgeError::NotLoggedIn => "not_logged_in",
            BridgeError::MaxHandlersReached(_) => "max_handlers_reached",
            BridgeError::MaxAddressLengthReached(_) => "max_address_length_reached",
            BridgeError::AuthTimeout => "auth_timeout",
            BridgeError::NoHandlers(_) => "no_handlers",
            BridgeError::ReplyTimeout(_) => "timeout",
            BridgeError::InvalidRule(_) | BridgeError::Server(_) => "internal_error",
        }
    }

    /// The session-layer category of the error, if it has one
    pub fn as_protocol_error(&self) -> Option<SockJsError> {
        match self {
            BridgeError::AccessDenied(address) => {
                Some(SockJsError::PermissionDenied(address.clone()))
            }
            BridgeError::NotLoggedIn => Some(SockJsError::PermissionDenied(self.to_string())),
            BridgeError::AuthTimeout => Some(SockJsError::AuthorizationTimeout),
            BridgeError::MaxHandlersReached(_) | BridgeError::MaxAddressLengthReached(_) => {
                Some(SockJsError::CapacityExceeded(self.to_string()))
            }
            _ => None,
        }
    }
}

/// Convenience type alias for bridge results
pub type BridgeResult<T> = Result<T, BridgeError>;
