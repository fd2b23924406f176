//! Error taxonomy for the SockJS session layer

use crate::SessionId;
use thiserror::Error;

/// Malformed transport-level payloads
///
/// These fail the physical request that carried them and never the session.
/// The display strings are the bodies the protocol answers with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("Payload expected.")]
    PayloadExpected,

    #[error("Broken JSON encoding.")]
    BrokenJson,

    #[error("\"callback\" parameter required")]
    CallbackRequired,

    #[error("invalid \"callback\" parameter")]
    InvalidCallback,
}

/// Errors surfaced by sessions, transports and the bridge
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SockJsError {
    /// Malformed framing on one physical connection
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// A send-only request named a session that does not exist
    #[error("Session {0} not found")]
    UnknownSession(SessionId),

    /// The session no longer accepts frames
    #[error("Session {0} is closed")]
    SessionClosed(SessionId),

    /// A bridge rule did not permit the frame
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The authorisation exchange did not finish in time
    #[error("Authorisation timed out")]
    AuthorizationTimeout,

    /// A per-session limit was hit
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// I/O failure on an attached transport; demoted to a detach
    #[error("Transport detached: {0}")]
    TransportDetach(String),

    /// Unrecognised transport name
    #[error("Unknown transport: {0}")]
    UnknownTransport(String),
}

impl SockJsError {
    /// Create a transport detach error from any displayable cause
    pub fn detach<E: std::fmt::Display>(error: E) -> Self {
        Self::TransportDetach(error.to_string())
    }
}

/// Result type for session layer operations
pub type Result<T> = std::result::Result<T, SockJsError>;
