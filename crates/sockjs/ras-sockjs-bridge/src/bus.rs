//! The event bus boundary and an in-process implementation

use crate::{BridgeError, BridgeResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

/// Identifier of one bus subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// A message travelling on the bus
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub address: String,
    pub body: Value,
    /// Where the receiver may send its reply
    pub reply_address: Option<String>,
}

impl BusMessage {
    pub fn new(address: impl Into<String>, body: Value) -> Self {
        Self {
            address: address.into(),
            body,
            reply_address: None,
        }
    }
}

/// Publish/subscribe with address based routing
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    /// Deliver to every subscriber of `address`
    async fn publish(&self, address: &str, body: Value) -> BridgeResult<()>;

    /// Deliver to one subscriber of `address`
    async fn send(&self, address: &str, body: Value, reply_address: Option<String>)
    -> BridgeResult<()>;

    /// Send and wait for the reply
    async fn request(&self, address: &str, body: Value, timeout: Duration)
    -> BridgeResult<BusMessage>;

    /// Route messages for `address` into `sink` until unsubscribed
    fn subscribe(&self, address: &str, sink: mpsc::UnboundedSender<BusMessage>) -> HandlerId;

    /// Returns whether the handler existed
    fn unsubscribe(&self, id: HandlerId) -> bool;
}

type Subscriber = (HandlerId, mpsc::UnboundedSender<BusMessage>);

/// In-process bus built on concurrent maps
#[derive(Debug, Default)]
pub struct LocalEventBus {
    handlers: DashMap<String, Vec<Subscriber>>,
    addresses: DashMap<HandlerId, String>,
    pending_replies: DashMap<String, oneshot::Sender<BusMessage>>,
    next_id: AtomicU64,
    round_robin: AtomicUsize,
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `address`
    pub fn handler_count(&self, address: &str) -> usize {
        self.handlers
            .get(address)
            .map(|subscribers| subscribers.iter().filter(|(_, tx)| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Total live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.addresses.len()
    }

    fn resolve_reply(&self, message: BusMessage) -> Result<(), BusMessage> {
        match self.pending_replies.remove(&message.address) {
            Some((_, waiter)) => waiter.send(message),
            None => Err(message),
        }
    }

    fn live_subscribers(&self, address: &str) -> Vec<Subscriber> {
        let Some(mut subscribers) = self.handlers.get_mut(address) else {
            return Vec::new();
        };
        subscribers.retain(|(_, tx)| !tx.is_closed());
        subscribers.clone()
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    async fn publish(&self, address: &str, body: Value) -> BridgeResult<()> {
        let message = match self.resolve_reply(BusMessage::new(address, body)) {
            Ok(()) => return Ok(()),
            Err(message) => message,
        };
        let subscribers = self.live_subscribers(address);
        debug!(address, subscribers = subscribers.len(), "publish");
        for (_, tx) in subscribers {
            let _ = tx.send(message.clone());
        }
        Ok(())
    }

    async fn send(
        &self,
        address: &str,
        body: Value,
        reply_address: Option<String>,
    ) -> BridgeResult<()> {
        let message = BusMessage {
            address: address.to_string(),
            body,
            reply_address,
        };
        let message = match self.resolve_reply(message) {
            Ok(()) => return Ok(()),
            Err(message) => message,
        };

        let subscribers = self.live_subscribers(address);
        if subscribers.is_empty() {
            return Err(BridgeError::NoHandlers(address.to_string()));
        }
        let index = self.round_robin.fetch_add(1, Ordering::Relaxed) % subscribers.len();
        let (_, tx) = &subscribers[index];
        tx.send(message)
            .map_err(|_| BridgeError::NoHandlers(address.to_string()))
    }

    async fn request(
        &self,
        address: &str,
        body: Value,
        timeout: Duration,
    ) -> BridgeResult<BusMessage> {
        let reply_address = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending_replies.insert(reply_address.clone(), tx);

        if let Err(err) = self.send(address, body, Some(reply_address.clone())).await {
            self.pending_replies.remove(&reply_address);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            _ => {
                self.pending_replies.remove(&reply_address);
                Err(BridgeError::ReplyTimeout(address.to_string()))
            }
        }
    }

    fn subscribe(&self, address: &str, sink: mpsc::UnboundedSender<BusMessage>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .entry(address.to_string())
            .or_default()
            .push((id, sink));
        self.addresses.insert(id, address.to_string());
        debug!(address, %id, "subscribed");
        id
    }

    fn unsubscribe(&self, id: HandlerId) -> bool {
        let Some((_, address)) = self.addresses.remove(&id) else {
            return false;
        };
        let now_empty = match self.handlers.get_mut(&address) {
            Some(mut subscribers) => {
                subscribers.retain(|(handler, _)| *handler != id);
                subscribers.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.handlers.remove_if(&address, |_, subscribers| subscribers.is_empty());
        }
        debug!(address = %address, %id, "unsubscribed");
        true
    }
}
