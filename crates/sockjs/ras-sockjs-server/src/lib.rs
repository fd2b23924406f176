//! SockJS session server on axum
//!
//! This crate hosts SockJS applications: every application owns a path
//! prefix and a [`SockJsHandler`] that receives one [`SockJsSocket`] per
//! logical session. Sessions survive the transports that carry them; the
//! WebSocket, XHR polling and streaming, EventSource, htmlfile and JSONP
//! transports all attach to the same session state machine.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use ras_sockjs_server::{SockJsConfig, SockJsServer, SockJsSocket, handler_fn};
//!
//! let server = SockJsServer::new();
//! server.install_app(
//!     SockJsConfig::builder().prefix("/echo").build(),
//!     handler_fn(|mut socket: SockJsSocket| async move {
//!         while let Some(message) = socket.recv().await {
//!             let _ = socket.send(message);
//!         }
//!     }),
//! )?;
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8081").await?;
//! axum::serve(listener, server.router()).await?;
//! ```

pub mod app;
pub mod config;
pub mod error;
pub mod handler;
mod http;
#[cfg(any(test, feature = "test-util"))]
pub mod loopback;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod socket;
mod transport;

pub use app::Application;
pub use config::{ServerOptions, SockJsConfig};
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerFn, NoopHook, SockJsHandler, SockJsHook, handler_fn};
#[cfg(any(test, feature = "test-util"))]
pub use loopback::{LoopbackPeer, loopback, loopback_with_hook};
pub use registry::SessionRegistry;
pub use router::{AppRouter, Route};
pub use server::SockJsServer;
pub use session::{Attach, ConnectionOrigin, Outbound, Session, TransportLease};
pub use socket::{SockJsSocket, SocketHandle};

// Re-export the protocol vocabulary so applications need a single dependency
pub use ras_sockjs_types::{
    CloseFrame, Frame, SessionId, SessionState, SockJsError, TransportKind,
};
