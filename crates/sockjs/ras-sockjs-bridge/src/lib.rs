//! Event bus bridge for SockJS sockets
//!
//! The bridge turns every socket of an application into a filtered
//! publish/subscribe endpoint on an [`EventBus`]. Clients exchange small JSON
//! messages (`send`, `publish`, `register`, `unregister`, `ping`); each one
//! is checked against an allow-list of [`PermissionRule`]s before it reaches
//! the bus, and each bus delivery is checked against a second list before it
//! reaches the client. Nothing crosses the bridge unless a rule permits it.
//!
//! ```rust,ignore
//! use ras_sockjs_bridge::{BridgeConfig, LocalEventBus, PermissionRule, install_bridge};
//! use ras_sockjs_server::{SockJsConfig, SockJsServer};
//!
//! let server = SockJsServer::new();
//! let bus = Arc::new(LocalEventBus::new());
//! install_bridge(
//!     &server,
//!     SockJsConfig::builder().prefix("/eventbus").build(),
//!     &[PermissionRule::address("chat.room1")],
//!     &[PermissionRule::address("chat.*")],
//!     BridgeConfig::default(),
//!     bus,
//! )?;
//! ```

pub mod auth;
pub mod bridge;
pub mod bus;
pub mod config;
pub mod error;
pub mod permission;
pub mod protocol;

pub use auth::{AuthCache, Authoriser, BusAuthoriser};
pub use bridge::{EventBusBridge, install_bridge};
pub use bus::{BusMessage, EventBus, HandlerId, LocalEventBus};
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use permission::{CompiledRule, PermissionMatcher, PermissionRule};
pub use protocol::ClientMessage;
