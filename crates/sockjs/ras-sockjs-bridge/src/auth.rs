//! Authorisation of bridged requests

use crate::bus::EventBus;
use crate::config::BridgeConfig;
use crate::{BridgeError, BridgeResult};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Decides whether a token may perform a request
#[async_trait]
pub trait Authoriser: Send + Sync + 'static {
    async fn authorise(&self, message: &Value, session_id: &str) -> BridgeResult<bool>;
}

/// Asks an authorisation service listening on the bus
///
/// The service receives `{"sessionID": <token>, "message": <request>}` and
/// grants access by replying `{"status": "ok"}`.
pub struct BusAuthoriser {
    bus: Arc<dyn EventBus>,
    address: String,
    timeout: Duration,
}

impl BusAuthoriser {
    pub fn new(bus: Arc<dyn EventBus>, config: &BridgeConfig) -> Self {
        Self {
            bus,
            address: config.auth_address.clone(),
            timeout: config.auth_timeout_duration(),
        }
    }
}

#[async_trait]
impl Authoriser for BusAuthoriser {
    async fn authorise(&self, message: &Value, session_id: &str) -> BridgeResult<bool> {
        let request = json!({ "sessionID": session_id, "message": message });
        match self.bus.request(&self.address, request, self.timeout).await {
            Ok(reply) => Ok(reply.body.get("status").and_then(Value::as_str) == Some("ok")),
            Err(BridgeError::ReplyTimeout(_)) => Err(BridgeError::AuthTimeout),
            Err(BridgeError::NoHandlers(address)) => {
                debug!("No authorisation service on '{}'", address);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

/// Tokens granted on one socket, each valid for a fixed period
#[derive(Debug)]
pub struct AuthCache {
    ttl: Duration,
    granted: HashMap<String, Instant>,
}

impl AuthCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            granted: HashMap::new(),
        }
    }

    pub fn is_granted(&self, token: &str, now: Instant) -> bool {
        self.granted
            .get(token)
            .map(|expires| *expires > now)
            .unwrap_or(false)
    }

    pub fn grant(&mut self, token: &str, now: Instant) {
        self.granted.insert(token.to_string(), now + self.ttl);
    }

    /// Drop expired tokens
    pub fn prune(&mut self, now: Instant) {
        self.granted.retain(|_, expires| *expires > now);
    }

    pub fn len(&self) -> usize {
        self.granted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.granted.is_empty()
    }
}
