//! Configuration for the SockJS echo server
//!
//! Values are layered, later sources winning:
//! - built-in defaults
//! - an optional TOML file (`sockjs.toml`, or the path in `SOCKJS_CONFIG_FILE`)
//! - environment variables with the `SOCKJS__` prefix, e.g. `SOCKJS__SERVER__PORT`

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File};
use ras_sockjs_bridge::{BridgeConfig, PermissionMatcher, PermissionRule};
use ras_sockjs_server::{ServerOptions, SockJsConfig};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use tracing::{debug, info};

/// Prefixes of the protocol test applications
pub const ECHO_PREFIXES: [&str; 4] = [
    "/echo",
    "/close",
    "/disabled_websocket_echo",
    "/cookie_needed_echo",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,

    /// Options shared by the echo applications; each one overrides the prefix
    pub sockjs: SockJsConfig,

    pub eventbus: EventBusConfig,

    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to (default: 127.0.0.1)
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to bind to (default: 8081)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Milliseconds between sweeps for expired sessions
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,
}

/// The bridged application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_eventbus_prefix")]
    pub prefix: String,

    pub bridge: BridgeConfig,

    /// Rules for client to bus traffic
    #[serde(default = "default_inbound")]
    pub inbound: Vec<PermissionRule>,

    /// Rules for bus to client traffic
    #[serde(default = "default_outbound")]
    pub outbound: Vec<PermissionRule>,

    /// Tokens the demo authorisation service accepts
    #[serde(default)]
    pub auth_tokens: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    8081
}

fn default_sweep_interval() -> u64 {
    ServerOptions::default().sweep_interval
}

fn default_true() -> bool {
    true
}

fn default_eventbus_prefix() -> String {
    "/eventbus".to_string()
}

fn default_inbound() -> Vec<PermissionRule> {
    vec![
        PermissionRule::address("chat.*"),
        PermissionRule::address("secure.orders").requiring_auth(),
    ]
}

fn default_outbound() -> Vec<PermissionRule> {
    vec![
        PermissionRule::address("chat.*"),
        PermissionRule::address("secure.orders"),
    ]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: default_eventbus_prefix(),
            bridge: BridgeConfig::default(),
            inbound: default_inbound(),
            outbound: default_outbound(),
            auth_tokens: vec![],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from the environment and an optional config file
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("SOCKJS_CONFIG_FILE").unwrap_or_else(|_| "sockjs.toml".to_string());
        let mut settings = Self::load_from(Path::new(&config_path))?;
        settings.apply_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Layer `path` (when it exists) and `SOCKJS__` variables over the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if path.exists() {
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(File::from(path));
        } else {
            debug!("No config file found at {}, using defaults", path.display());
        }

        builder = builder.add_source(
            Environment::with_prefix("SOCKJS")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("PORT") {
            info!("Using PORT environment variable");
            self.server.port = port.parse().context("Invalid PORT value")?;
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.logging.level = log_level;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }
        if self.server.sweep_interval == 0 {
            anyhow::bail!("Sweep interval must be greater than 0");
        }

        self.sockjs
            .validate()
            .context("Invalid [sockjs] application options")?;

        if self.eventbus.enabled {
            let prefix = self.eventbus.prefix.trim_end_matches('/');
            if ECHO_PREFIXES.contains(&prefix) {
                anyhow::bail!("Event bus prefix '{}' is taken by an echo application", prefix);
            }
            if self.eventbus.bridge.max_handlers_per_socket == 0 {
                anyhow::bail!("max_handlers_per_socket must be greater than 0");
            }
            PermissionMatcher::new(&self.eventbus.inbound).context("Invalid inbound rule")?;
            PermissionMatcher::new(&self.eventbus.outbound).context("Invalid outbound rule")?;
        }

        let valid_formats = ["pretty", "json", "compact"];
        let format_lower = self.logging.format.to_lowercase();
        if !valid_formats.contains(&format_lower.as_str()) {
            anyhow::bail!(
                "Invalid log format '{}'. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            );
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.server.host, self.server.port))
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions::builder()
            .sweep_interval(self.server.sweep_interval)
            .build()
    }

    /// Log filter directive for tracing
    pub fn log_filter(&self) -> String {
        if self.logging.level.contains('=') || self.logging.level.contains(',') {
            self.logging.level.clone()
        } else {
            format!(
                "sockjs_echo_server={level},ras_sockjs_server={level},ras_sockjs_bridge={level},{level}",
                level = self.logging.level
            )
        }
    }
}
