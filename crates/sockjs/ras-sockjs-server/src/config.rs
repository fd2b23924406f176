//! Per-application and per-server configuration

use crate::{ServerError, ServerResult};
use bon::Builder;
use ras_sockjs_types::TransportKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_HEARTBEAT_PERIOD_MS: u64 = 25_000;
pub const DEFAULT_MAX_BYTES_STREAMING: usize = 128 * 1024;
pub const DEFAULT_LIBRARY_URL: &str = "http://cdn.sockjs.org/sockjs-0.3.4.min.js";
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;

/// Configuration of one installed SockJS application
///
/// Field names follow the option names clients of the protocol know, so a
/// JSON or TOML document written for other SockJS servers deserializes as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct SockJsConfig {
    /// Milliseconds an unattached session survives before it is closed
    #[builder(default = DEFAULT_SESSION_TIMEOUT_MS)]
    pub session_timeout: u64,

    /// Whether to emit a JSESSIONID cookie for sticky load balancing
    #[serde(rename = "insert_JSESSIONID", alias = "insert_jsessionid")]
    #[builder(default = true)]
    pub insert_jsessionid: bool,

    /// Milliseconds between heartbeat frames on an idle transport
    #[builder(default = DEFAULT_HEARTBEAT_PERIOD_MS)]
    pub heartbeat_period: u64,

    /// Bytes a streaming response may carry before it is rotated
    #[builder(default = DEFAULT_MAX_BYTES_STREAMING)]
    pub max_bytes_streaming: usize,

    /// Path prefix owned by the application
    #[builder(into, default = "/".to_string())]
    pub prefix: String,

    /// Client library loaded by the iframe transports
    #[builder(into, default = DEFAULT_LIBRARY_URL.to_string())]
    pub library_url: String,

    /// Transports excluded from negotiation
    #[builder(default)]
    pub disabled_transports: Vec<TransportKind>,
}

impl Default for SockJsConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SockJsConfig {
    pub fn session_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.session_timeout)
    }

    pub fn heartbeat_duration(&self) -> Duration {
        Duration::from_millis(self.heartbeat_period)
    }

    /// Whether a transport may be used with this application
    pub fn is_enabled(&self, kind: TransportKind) -> bool {
        let governing = kind.governing_kind();
        !self.disabled_transports.contains(&governing)
    }

    /// The prefix in routing form: leading slash, no trailing slash, and the
    /// root prefix as the empty string
    pub fn routing_prefix(&self) -> String {
        let trimmed = self.prefix.trim_end_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> ServerResult<()> {
        if self.session_timeout == 0 {
            return Err(ServerError::InvalidConfig(
                "session_timeout must be greater than 0".to_string(),
            ));
        }
        if self.heartbeat_period == 0 {
            return Err(ServerError::InvalidConfig(
                "heartbeat_period must be greater than 0".to_string(),
            ));
        }
        if self.max_bytes_streaming == 0 {
            return Err(ServerError::InvalidConfig(
                "max_bytes_streaming must be greater than 0".to_string(),
            ));
        }
        if self.prefix.contains(|c: char| c.is_whitespace() || c == '?' || c == '#') {
            return Err(ServerError::InvalidConfig(format!(
                "prefix '{}' is not a plain path",
                self.prefix
            )));
        }
        Ok(())
    }
}

/// Server-wide options that do not belong to any one application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct ServerOptions {
    /// Milliseconds between sweeps for expired sessions
    #[builder(default = DEFAULT_SWEEP_INTERVAL_MS)]
    pub sweep_interval: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ServerOptions {
    pub fn sweep_duration(&self) -> Duration {
        Duration::from_millis(self.sweep_interval.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SockJsConfig::default();
        assert_eq!(config.session_timeout, 5_000);
        assert!(config.insert_jsessionid);
        assert_eq!(config.heartbeat_period, 25_000);
        assert_eq!(config.max_bytes_streaming, 131_072);
        assert_eq!(config.prefix, "/");
        assert_eq!(config.library_url, DEFAULT_LIBRARY_URL);
        assert!(config.disabled_transports.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_protocol_option_names() {
        let config: SockJsConfig = serde_json::from_str(
            r#"{
                "prefix": "/echo",
                "insert_JSESSIONID": false,
                "session_timeout": 1000,
                "disabled_transports": ["websocket"]
            }"#,
        )
        .unwrap();

        assert_eq!(config.prefix, "/echo");
        assert!(!config.insert_jsessionid);
        assert_eq!(config.session_timeout, 1000);
        assert_eq!(config.heartbeat_period, DEFAULT_HEARTBEAT_PERIOD_MS);
        assert!(!config.is_enabled(TransportKind::WebSocket));
        assert!(!config.is_enabled(TransportKind::RawWebSocket));
        assert!(config.is_enabled(TransportKind::XhrPolling));
    }

    #[test]
    fn test_routing_prefix() {
        let prefix = |p: &str| SockJsConfig::builder().prefix(p).build().routing_prefix();
        assert_eq!(prefix("/"), "");
        assert_eq!(prefix("/echo"), "/echo");
        assert_eq!(prefix("/echo/"), "/echo");
        assert_eq!(prefix("echo"), "/echo");
    }

    #[test]
    fn test_invalid_config() {
        let config = SockJsConfig::builder().heartbeat_period(0).build();
        assert!(config.validate().is_err());

        let config = SockJsConfig::builder().prefix("/a b").build();
        assert!(config.validate().is_err());
    }
}
