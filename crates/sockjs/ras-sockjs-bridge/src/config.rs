//! Bridge configuration

use bon::Builder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_AUTH_ADDRESS: &str = "auth.authorise";
pub const DEFAULT_AUTH_TIMEOUT_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_PING_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_MAX_ADDRESS_LENGTH: usize = 200;
pub const DEFAULT_MAX_HANDLERS_PER_SOCKET: usize = 1000;
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 30_000;

/// Limits and timings of one bridge installation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bus address the authorisation request is sent to
    #[builder(into, default = DEFAULT_AUTH_ADDRESS.to_string())]
    pub auth_address: String,

    /// Milliseconds an authorisation may take, and how long a granted
    /// token stays cached
    #[builder(default = DEFAULT_AUTH_TIMEOUT_MS)]
    pub auth_timeout: u64,

    /// Milliseconds between application-level pings
    #[builder(default = DEFAULT_PING_INTERVAL_MS)]
    pub ping_interval: u64,

    #[builder(default = DEFAULT_MAX_ADDRESS_LENGTH)]
    pub max_address_length: usize,

    #[builder(default = DEFAULT_MAX_HANDLERS_PER_SOCKET)]
    pub max_handlers_per_socket: usize,

    /// Milliseconds to wait for the reply to a client request
    #[builder(default = DEFAULT_REPLY_TIMEOUT_MS)]
    pub reply_timeout: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BridgeConfig {
    pub fn auth_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.auth_timeout)
    }

    pub fn ping_duration(&self) -> Duration {
        Duration::from_millis(self.ping_interval.max(1))
    }

    pub fn reply_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.reply_timeout)
    }
}
