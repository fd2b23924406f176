//! Server-to-client frames and their wire encoding

use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Code and reason carried by a close frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Default frame for an application initiated close
    pub fn go_away() -> Self {
        Self::new(3000, "Go away!")
    }

    /// Sent to a receiver that arrives while another one is attached
    pub fn another_connection_open() -> Self {
        Self::new(2010, "Another connection still open")
    }

    /// Recorded when the receiving side vanished before a close was delivered
    pub fn interrupted() -> Self {
        Self::new(1002, "Connection interrupted")
    }
}

impl Default for CloseFrame {
    fn default() -> Self {
        Self::go_away()
    }
}

/// One logical server frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Open,
    Heartbeat,
    /// A batch of application messages, delivered in order
    Messages(Vec<String>),
    Close(CloseFrame),
}

impl Frame {
    /// Encode the frame as it travels inside any transport envelope
    pub fn encode(&self) -> String {
        match self {
            Frame::Open => "o".to_string(),
            Frame::Heartbeat => "h".to_string(),
            Frame::Messages(messages) => {
                let mut out = String::from("a[");
                for (index, message) in messages.iter().enumerate() {
                    if index > 0 {
                        out.push(',');
                    }
                    out.push_str(&quote(message));
                }
                out.push(']');
                out
            }
            Frame::Close(close) => format!("c[{},{}]", close.code, quote(&close.reason)),
        }
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Frame::Close(_))
    }
}

/// JSON-quote a string, additionally escaping characters that some
/// browsers and proxies mangle when they appear raw in a response body
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if needs_unicode_escape(c) => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn needs_unicode_escape(ch: char) -> bool {
    matches!(
        ch as u32,
        0x0000..=0x001f
            | 0x007f..=0x009f
            | 0x00ad
            | 0x0600..=0x0604
            | 0x070f
            | 0x17b4
            | 0x17b5
            | 0x200c..=0x200f
            | 0x2028..=0x202f
            | 0x2060..=0x206f
            | 0xfeff
            | 0xfff0..=0xffff
    )
}
