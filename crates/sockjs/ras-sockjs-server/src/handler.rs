//! Application handlers and lifecycle hooks

use crate::socket::{SockJsSocket, SocketHandle};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;

/// Drives one socket from open to close
///
/// Called once per session, on its own task, right after the open frame has
/// been handed to the transport. Returning early does not close the socket;
/// use [`SockJsSocket::close`] for that.
#[async_trait]
pub trait SockJsHandler: Send + Sync + 'static {
    async fn handle_socket(&self, socket: SockJsSocket);
}

/// Adapter turning an async closure into a [`SockJsHandler`]
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap an async closure as a handler
///
/// ```rust,ignore
/// let echo = handler_fn(|mut socket: SockJsSocket| async move {
///     while let Some(message) = socket.recv().await {
///         let _ = socket.send(message);
///     }
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(SockJsSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> SockJsHandler for HandlerFn<F>
where
    F: Fn(SockJsSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle_socket(&self, socket: SockJsSocket) {
        (self.f)(socket).await
    }
}

/// Observer callbacks at well-defined session and bridge lifecycle points
///
/// Every method has a permissive default. Methods returning `bool` may veto
/// the action they announce by returning `false`.
#[async_trait]
pub trait SockJsHook: Send + Sync + 'static {
    /// A socket opened; returning `false` closes it before the handler runs
    async fn socket_created(&self, _socket: &SocketHandle) -> bool {
        true
    }

    /// A socket reached CLOSED
    async fn socket_closed(&self, _socket: &SocketHandle) {}

    /// A bridged client is about to send (`send == true`) or publish
    async fn send_or_pub(
        &self,
        _socket: &SocketHandle,
        _send: bool,
        _body: &Value,
        _address: &str,
    ) -> bool {
        true
    }

    /// A bridged client is about to subscribe to `address`
    async fn pre_register(&self, _socket: &SocketHandle, _address: &str) -> bool {
        true
    }

    /// A bridged client subscribed to `address`
    async fn post_register(&self, _socket: &SocketHandle, _address: &str) {}

    /// A bridged client is about to unsubscribe from `address`
    async fn unregister(&self, _socket: &SocketHandle, _address: &str) -> bool {
        true
    }

    /// Decide whether `session_id` may perform `message`
    ///
    /// `None` defers to the bus authoriser.
    async fn authorise(&self, _message: &Value, _session_id: &str) -> Option<bool> {
        None
    }
}

/// Hook that observes nothing and permits everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl SockJsHook for NoopHook {}
