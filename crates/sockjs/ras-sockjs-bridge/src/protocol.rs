//! JSON messages exchanged between a bridged client and the server

use crate::{BridgeError, BridgeResult};
use serde::Deserialize;
use serde_json::{Value, json};

/// Frame the server sends on every ping tick
pub const PING_FRAME: &str = r#"{"type":"ping"}"#;

/// A message written by the client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Send {
        address: String,
        #[serde(default)]
        body: Value,
        #[serde(default, rename = "replyAddress")]
        reply_address: Option<String>,
        #[serde(default, rename = "sessionID")]
        session_id: Option<String>,
    },
    Publish {
        address: String,
        #[serde(default)]
        body: Value,
        #[serde(default, rename = "sessionID")]
        session_id: Option<String>,
    },
    Register {
        address: String,
        #[serde(default, rename = "sessionID")]
        session_id: Option<String>,
    },
    Unregister {
        address: String,
        #[serde(default, rename = "sessionID")]
        session_id: Option<String>,
    },
    Ping,
}

const KNOWN_TYPES: [&str; 5] = ["send", "publish", "register", "unregister", "ping"];

impl ClientMessage {
    /// Parse one SockJS message
    ///
    /// Text that is not a JSON object is `invalid_json`; an object without a
    /// known `type` is `invalid_type`.
    pub fn parse(text: &str) -> BridgeResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|err| BridgeError::InvalidJson(err.to_string()))?;
        if !value.is_object() {
            return Err(BridgeError::InvalidJson("expected a JSON object".to_string()));
        }

        match value.get("type").and_then(Value::as_str) {
            Some(kind) if KNOWN_TYPES.contains(&kind) => {}
            Some(kind) => return Err(BridgeError::InvalidType(kind.to_string())),
            None => return Err(BridgeError::InvalidType("missing".to_string())),
        }

        serde_json::from_value(value)
            .map_err(|err| BridgeError::InvalidJson(err.to_string()))
    }

    pub fn address(&self) -> Option<&str> {
        match self {
            ClientMessage::Send { address, .. }
            | ClientMessage::Publish { address, .. }
            | ClientMessage::Register { address, .. }
            | ClientMessage::Unregister { address, .. } => Some(address),
            ClientMessage::Ping => None,
        }
    }

    /// Authorisation token the client attached
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ClientMessage::Send { session_id, .. }
            | ClientMessage::Publish { session_id, .. }
            | ClientMessage::Register { session_id, .. }
            | ClientMessage::Unregister { session_id, .. } => session_id.as_deref(),
            ClientMessage::Ping => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Send { .. } => "send",
            ClientMessage::Publish { .. } => "publish",
            ClientMessage::Register { .. } => "register",
            ClientMessage::Unregister { .. } => "unregister",
            ClientMessage::Ping => "ping",
        }
    }
}

/// A bus message as the client sees it
pub fn encode_delivery(address: &str, body: &Value, reply_address: Option<&str>) -> String {
    let mut frame = json!({ "address": address, "body": body });
    if let Some(reply_address) = reply_address {
        frame["replyAddress"] = Value::from(reply_address);
    }
    frame.to_string()
}

/// An error report; `address` names the address the failed request targeted
pub fn encode_error(code: &str, address: Option<&str>) -> String {
    let mut frame = json!({ "type": "err", "body": code });
    if let Some(address) = address {
        frame["address"] = Value::from(address);
    }
    frame.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send() {
        let message = ClientMessage::parse(
            r#"{"type":"send","address":"orders","body":{"id":1},"replyAddress":"r1","sessionID":"t"}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            ClientMessage::Send {
                address: "orders".into(),
                body: json!({"id": 1}),
                reply_address: Some("r1".into()),
                session_id: Some("t".into()),
            }
        );
        assert_eq!(message.session_id(), Some("t"));
    }

    #[test]
    fn test_parse_register_and_ping() {
        let message = ClientMessage::parse(r#"{"type":"register","address":"news"}"#).unwrap();
        assert_eq!(message.address(), Some("news"));
        assert_eq!(message.kind(), "register");
        assert_eq!(
            ClientMessage::parse(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(ClientMessage::parse("{oops").unwrap_err().code(), "invalid_json");
        assert_eq!(ClientMessage::parse("[1,2]").unwrap_err().code(), "invalid_json");
        assert_eq!(
            ClientMessage::parse(r#"{"address":"a"}"#).unwrap_err().code(),
            "invalid_type"
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"shout","address":"a"}"#)
                .unwrap_err()
                .code(),
            "invalid_type"
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"register"}"#).unwrap_err().code(),
            "invalid_json"
        );
    }

    #[test]
    fn test_encoders() {
        let delivery: Value =
            serde_json::from_str(&encode_delivery("news", &json!("hi"), Some("r"))).unwrap();
        assert_eq!(
            delivery,
            json!({"address": "news", "body": "hi", "replyAddress": "r"})
        );

        let error: Value =
            serde_json::from_str(&encode_error("access_denied", Some("x"))).unwrap();
        assert_eq!(
            error,
            json!({"type": "err", "body": "access_denied", "address": "x"})
        );
        let ping: Value = serde_json::from_str(PING_FRAME).unwrap();
        assert_eq!(ping["type"], "ping");
    }
}
