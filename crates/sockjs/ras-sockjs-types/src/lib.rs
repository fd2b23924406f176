//! Core types for the SockJS session protocol
//!
//! This crate provides the vocabulary shared by the server and the event bus
//! bridge: session identifiers, transport kinds, the session state enum, the
//! wire encoding of server frames and the decoding of client payloads.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod codec;
pub mod error;
pub mod frame;

pub use codec::{decode_form_payload, decode_messages, validate_callback};
pub use error::{FramingError, Result, SockJsError};
pub use frame::{CloseFrame, Frame, quote};

/// Identifier of a logical SockJS session
///
/// Client supplied identifiers come from the `<session>` path segment and
/// must be non-empty and free of dots. Server generated ones are used for
/// the raw WebSocket endpoint, which carries no session segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Parse a client supplied path segment
    pub fn parse(segment: &str) -> Option<Self> {
        if is_valid_segment(segment) {
            Some(Self(segment.to_string()))
        } else {
            None
        }
    }

    /// Generate a fresh server-side identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server and session path segments share the same validity rule
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains('.')
}

/// The physical mechanisms a session can be carried over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// SockJS framed WebSocket
    #[serde(rename = "websocket")]
    WebSocket,
    /// Unframed WebSocket on `<prefix>/websocket`
    #[serde(rename = "raw_websocket")]
    RawWebSocket,
    /// XHR long polling
    #[serde(rename = "xhr")]
    XhrPolling,
    /// XHR streaming
    XhrStreaming,
    /// XHR send endpoint for the polling and streaming transports
    XhrSend,
    /// Server-sent events
    #[serde(rename = "eventsource")]
    EventSource,
    /// Forever-iframe streaming
    #[serde(rename = "htmlfile")]
    HtmlFile,
    /// JSONP long polling
    #[serde(rename = "jsonp")]
    JsonpPolling,
    /// JSONP send endpoint
    JsonpSend,
}

impl TransportKind {
    /// All kinds, in negotiation order
    pub const ALL: [TransportKind; 9] = [
        TransportKind::WebSocket,
        TransportKind::RawWebSocket,
        TransportKind::XhrStreaming,
        TransportKind::EventSource,
        TransportKind::HtmlFile,
        TransportKind::XhrPolling,
        TransportKind::JsonpPolling,
        TransportKind::XhrSend,
        TransportKind::JsonpSend,
    ];

    /// Resolve the `<transport>` path segment of a session URL
    ///
    /// The raw WebSocket endpoint has no session segment and is therefore
    /// never produced here.
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "websocket" => Some(TransportKind::WebSocket),
            "xhr" => Some(TransportKind::XhrPolling),
            "xhr_streaming" => Some(TransportKind::XhrStreaming),
            "xhr_send" => Some(TransportKind::XhrSend),
            "eventsource" => Some(TransportKind::EventSource),
            "htmlfile" => Some(TransportKind::HtmlFile),
            "jsonp" => Some(TransportKind::JsonpPolling),
            "jsonp_send" => Some(TransportKind::JsonpSend),
            _ => None,
        }
    }

    /// The name used in URLs and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::RawWebSocket => "raw_websocket",
            TransportKind::XhrPolling => "xhr",
            TransportKind::XhrStreaming => "xhr_streaming",
            TransportKind::XhrSend => "xhr_send",
            TransportKind::EventSource => "eventsource",
            TransportKind::HtmlFile => "htmlfile",
            TransportKind::JsonpPolling => "jsonp",
            TransportKind::JsonpSend => "jsonp_send",
        }
    }

    /// Whether one response carries frames until the byte budget is spent
    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            TransportKind::XhrStreaming | TransportKind::EventSource | TransportKind::HtmlFile
        )
    }

    /// Whether the physical connection is the session
    ///
    /// WebSocket sessions cannot be resumed, so losing the socket closes the
    /// session instead of starting the reattachment countdown.
    pub fn closes_session_on_detach(&self) -> bool {
        matches!(self, TransportKind::WebSocket | TransportKind::RawWebSocket)
    }

    /// The kind whose disablement also disables this one
    ///
    /// The raw endpoint follows the framed WebSocket switch.
    pub fn governing_kind(&self) -> TransportKind {
        match self {
            TransportKind::RawWebSocket => TransportKind::WebSocket,
            other => *other,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = SockJsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raw_websocket" => Ok(TransportKind::RawWebSocket),
            other => TransportKind::from_segment(other)
                .ok_or_else(|| SockJsError::UnknownTransport(other.to_string())),
        }
    }
}

/// Lifecycle states of a logical session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Created, open frame not yet delivered
    Connecting,
    /// Open frame delivered, frames flow both ways
    Open,
    /// Close requested, close frame awaiting delivery
    Closing,
    /// Terminal
    Closed,
}

impl SessionState {
    /// Whether the application may still exchange frames
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Open)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "CONNECTING",
            SessionState::Open => "OPEN",
            SessionState::Closing => "CLOSING",
            SessionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_parsing() {
        assert_eq!(SessionId::parse("abc123").unwrap().as_str(), "abc123");
        assert!(SessionId::parse("").is_none());
        assert!(SessionId::parse("a.b").is_none());

        let first = SessionId::generate();
        let second = SessionId::generate();
        assert_ne!(first, second);
        assert!(is_valid_segment(first.as_str()));
    }

    #[test]
    fn test_transport_segments() {
        for kind in TransportKind::ALL {
            if kind == TransportKind::RawWebSocket {
                assert!(TransportKind::from_segment(kind.as_str()).is_none());
            } else {
                assert_eq!(TransportKind::from_segment(kind.as_str()), Some(kind));
            }
            assert_eq!(kind.as_str().parse::<TransportKind>().unwrap(), kind);
        }
        assert!(TransportKind::from_segment("carrier_pigeon").is_none());
    }

    #[test]
    fn test_transport_classification() {
        assert!(TransportKind::EventSource.is_streaming());
        assert!(TransportKind::WebSocket.closes_session_on_detach());
        assert!(!TransportKind::XhrPolling.closes_session_on_detach());
        assert_eq!(
            TransportKind::RawWebSocket.governing_kind(),
            TransportKind::WebSocket
        );
    }

    #[test]
    fn test_transport_kind_config_names() {
        let kinds: Vec<TransportKind> =
            serde_json::from_str(r#"["websocket", "xhr_streaming", "eventsource"]"#).unwrap();
        assert_eq!(
            kinds,
            vec![
                TransportKind::WebSocket,
                TransportKind::XhrStreaming,
                TransportKind::EventSource
            ]
        );
    }
}
