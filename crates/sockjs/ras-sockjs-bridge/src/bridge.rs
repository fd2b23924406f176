//! Exposes sockets as filtered endpoints on an event bus
//!
//! Every bridged socket is served by one task that owns the socket's bus
//! registrations, its authorisation cache and the reply addresses it may
//! answer. Inbound frames, bus deliveries and ping ticks are handled one at a
//! time on that task, so none of this state is shared.

use crate::auth::{AuthCache, Authoriser, BusAuthoriser};
use crate::bus::{BusMessage, EventBus, HandlerId};
use crate::config::BridgeConfig;
use crate::permission::{PermissionMatcher, PermissionRule};
use crate::protocol::{ClientMessage, PING_FRAME, encode_delivery, encode_error};
use crate::{BridgeError, BridgeResult};
use async_trait::async_trait;
use ras_sockjs_server::{SockJsConfig, SockJsHandler, SockJsServer, SockJsSocket, SocketHandle};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Bus bridge installed as the handler of a SockJS application
pub struct EventBusBridge {
    bus: Arc<dyn EventBus>,
    inbound: PermissionMatcher,
    outbound: PermissionMatcher,
    config: BridgeConfig,
    authoriser: Arc<dyn Authoriser>,
}

impl EventBusBridge {
    /// Compile both rule lists and authorise through the bus
    pub fn new(
        bus: Arc<dyn EventBus>,
        inbound: &[PermissionRule],
        outbound: &[PermissionRule],
        config: BridgeConfig,
    ) -> BridgeResult<Self> {
        let authoriser = Arc::new(BusAuthoriser::new(Arc::clone(&bus), &config));
        Ok(Self {
            inbound: PermissionMatcher::new(inbound)?,
            outbound: PermissionMatcher::new(outbound)?,
            bus,
            config,
            authoriser,
        })
    }

    /// Replace the bus authoriser
    pub fn with_authoriser(mut self, authoriser: Arc<dyn Authoriser>) -> Self {
        self.authoriser = authoriser;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

/// Install a bridge as the application at `sockjs_config.prefix`
pub fn install_bridge(
    server: &SockJsServer,
    sockjs_config: SockJsConfig,
    inbound: &[PermissionRule],
    outbound: &[PermissionRule],
    bridge_config: BridgeConfig,
    bus: Arc<dyn EventBus>,
) -> BridgeResult<()> {
    let bridge = EventBusBridge::new(bus, inbound, outbound, bridge_config)?;
    server.install_app(sockjs_config, bridge)?;
    Ok(())
}

#[async_trait]
impl SockJsHandler for EventBusBridge {
    async fn handle_socket(&self, socket: SockJsSocket) {
        let (handle, mut inbound) = socket.split();
        let (deliveries_tx, mut deliveries) = mpsc::unbounded_channel();
        let (replies_tx, mut replies) = mpsc::unbounded_channel();
        let mut bridged = BridgedSocket::new(self, handle, deliveries_tx, replies_tx);
        info!("Bridged socket opened: {}", bridged.handle.id());

        let period = self.config.ping_duration();
        let mut ping = tokio::time::interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(frame) => {
                        bridged.last_received = Instant::now();
                        bridged.handle_frame(&frame).await;
                        bridged.last_received = Instant::now();
                    }
                    None => break,
                },
                Some(message) = deliveries.recv() => bridged.deliver(message),
                Some(reply) = replies.recv() => bridged.deliver_reply(reply),
                _ = ping.tick() => bridged.ping(period),
            }
        }

        bridged.unregister_all().await;
        info!("Bridged socket closed: {}", bridged.handle.id());
    }
}

/// The answer to a client request, or the failure reported at its reply address
type ReplyOutcome = Result<BusMessage, (String, BridgeError)>;

/// Per-socket bridge state
struct BridgedSocket<'a> {
    bridge: &'a EventBusBridge,
    handle: SocketHandle,
    registrations: HashMap<HandlerId, String>,
    /// Reply addresses of deliveries the client may answer, with expiry
    awaiting_replies: HashMap<String, Instant>,
    auth_cache: AuthCache,
    last_received: Instant,
    deliveries_tx: mpsc::UnboundedSender<BusMessage>,
    replies_tx: mpsc::UnboundedSender<ReplyOutcome>,
}

impl<'a> BridgedSocket<'a> {
    fn new(
        bridge: &'a EventBusBridge,
        handle: SocketHandle,
        deliveries_tx: mpsc::UnboundedSender<BusMessage>,
        replies_tx: mpsc::UnboundedSender<ReplyOutcome>,
    ) -> Self {
        Self {
            bridge,
            handle,
            registrations: HashMap::new(),
            awaiting_replies: HashMap::new(),
            auth_cache: AuthCache::new(bridge.config.auth_timeout_duration()),
            last_received: Instant::now(),
            deliveries_tx,
            replies_tx,
        }
    }

    async fn handle_frame(&mut self, frame: &str) {
        let message = match ClientMessage::parse(frame) {
            Ok(message) => message,
            Err(err) => {
                warn!("Rejected bridge frame on {}: {}", self.handle.id(), err);
                self.report(&err, None);
                return;
            }
        };

        debug!(
            session = %self.handle.id(),
            kind = message.kind(),
            address = message.address().unwrap_or(""),
            "bridge frame"
        );

        let address = message.address().map(str::to_string);
        if let Err(err) = self.dispatch(message).await {
            match err.as_protocol_error() {
                Some(category) => info!(
                    session = %self.handle.id(),
                    address = address.as_deref().unwrap_or(""),
                    "Bridge request refused: {}",
                    category
                ),
                None => debug!("Bridge request on {} failed: {}", self.handle.id(), err),
            }
            self.report(&err, address.as_deref());
        }
    }

    async fn dispatch(&mut self, message: ClientMessage) -> BridgeResult<()> {
        // Register checks the handler cap before the address
        let address = match &message {
            ClientMessage::Register { .. } => None,
            other => other.address(),
        };
        if let Some(address) = address {
            self.check_address_length(address)?;
        }

        match message {
            ClientMessage::Ping => Ok(()),
            ClientMessage::Register {
                address,
                session_id,
            } => self.register(address, session_id).await,
            ClientMessage::Unregister { address, .. } => self.unregister(&address).await,
            ClientMessage::Publish {
                address,
                body,
                session_id,
            } => {
                self.check_inbound("publish", &address, &body, session_id.as_deref())
                    .await?;
                if !self
                    .handle
                    .hook()
                    .send_or_pub(&self.handle, false, &body, &address)
                    .await
                {
                    return Err(BridgeError::AccessDenied(address));
                }
                self.bridge.bus.publish(&address, body).await
            }
            ClientMessage::Send {
                address,
                body,
                reply_address,
                session_id,
            } => self.send(address, body, reply_address, session_id).await,
        }
    }

    async fn register(&mut self, address: String, session_id: Option<String>) -> BridgeResult<()> {
        let limit = self.bridge.config.max_handlers_per_socket;
        if self.registrations.len() >= limit {
            return Err(BridgeError::MaxHandlersReached(limit));
        }
        self.check_address_length(&address)?;
        self.check_inbound("register", &address, &Value::Null, session_id.as_deref())
            .await?;
        if !self.handle.hook().pre_register(&self.handle, &address).await {
            return Err(BridgeError::AccessDenied(address));
        }

        let id = self
            .bridge
            .bus
            .subscribe(&address, self.deliveries_tx.clone());
        self.registrations.insert(id, address.clone());
        debug!("Socket {} registered {} on '{}'", self.handle.id(), id, address);
        self.handle.hook().post_register(&self.handle, &address).await;
        Ok(())
    }

    async fn unregister(&mut self, address: &str) -> BridgeResult<()> {
        let Some(id) = self
            .registrations
            .iter()
            .find(|(_, registered)| registered.as_str() == address)
            .map(|(id, _)| *id)
        else {
            return Ok(());
        };
        if !self.handle.hook().unregister(&self.handle, address).await {
            return Err(BridgeError::AccessDenied(address.to_string()));
        }
        self.registrations.remove(&id);
        self.bridge.bus.unsubscribe(id);
        debug!("Socket {} unregistered {} from '{}'", self.handle.id(), id, address);
        Ok(())
    }

    async fn send(
        &mut self,
        address: String,
        body: Value,
        reply_address: Option<String>,
        session_id: Option<String>,
    ) -> BridgeResult<()> {
        // Answering a delivery the client received needs no inbound rule
        let answering = self
            .awaiting_replies
            .remove(&address)
            .is_some_and(|expires| expires > Instant::now());
        if !answering {
            self.check_inbound("send", &address, &body, session_id.as_deref())
                .await?;
        }
        if !self
            .handle
            .hook()
            .send_or_pub(&self.handle, true, &body, &address)
            .await
        {
            return Err(BridgeError::AccessDenied(address));
        }

        let Some(reply_address) = reply_address else {
            return match self.bridge.bus.send(&address, body, None).await {
                Err(BridgeError::NoHandlers(address)) => {
                    debug!("Dropped send to '{}': no handlers", address);
                    Ok(())
                }
                other => other,
            };
        };

        let bus = Arc::clone(&self.bridge.bus);
        let replies = self.replies_tx.clone();
        let timeout = self.bridge.config.reply_timeout_duration();
        tokio::spawn(async move {
            let reply = bus
                .request(&address, body, timeout)
                .await
                .map(|reply| BusMessage {
                    address: reply_address.clone(),
                    body: reply.body,
                    reply_address: reply.reply_address,
                })
                .map_err(|err| (reply_address, err));
            let _ = replies.send(reply);
        });
        Ok(())
    }

    async fn check_inbound(
        &mut self,
        kind: &str,
        address: &str,
        body: &Value,
        session_id: Option<&str>,
    ) -> BridgeResult<()> {
        let requires_auth = match self.bridge.inbound.check(address, body) {
            Some(rule) => rule.requires_auth(),
            None => return Err(BridgeError::AccessDenied(address.to_string())),
        };
        if !requires_auth {
            return Ok(());
        }

        let Some(token) = session_id else {
            return Err(BridgeError::NotLoggedIn);
        };
        if self.auth_cache.is_granted(token, Instant::now()) {
            return Ok(());
        }

        let request = json!({ "type": kind, "address": address, "body": body });
        let timeout = self.bridge.config.auth_timeout_duration();
        let decision = tokio::time::timeout(timeout, async {
            match self.handle.hook().authorise(&request, token).await {
                Some(decision) => Ok(decision),
                None => self.bridge.authoriser.authorise(&request, token).await,
            }
        })
        .await
        .map_err(|_| BridgeError::AuthTimeout)??;

        if decision {
            self.auth_cache.grant(token, Instant::now());
            Ok(())
        } else {
            Err(BridgeError::AccessDenied(address.to_string()))
        }
    }

    fn check_address_length(&self, address: &str) -> BridgeResult<()> {
        let limit = self.bridge.config.max_address_length;
        if address.chars().count() > limit {
            return Err(BridgeError::MaxAddressLengthReached(limit));
        }
        Ok(())
    }

    /// Forward a bus delivery if the outbound rules permit it
    fn deliver(&mut self, message: BusMessage) {
        if !self.bridge.outbound.permits(&message.address, &message.body) {
            debug!(
                "Dropped delivery on '{}' to {}: not permitted",
                message.address,
                self.handle.id()
            );
            return;
        }
        self.forward(message);
    }

    /// Forward the answer to a client request; replies bypass the outbound rules
    fn deliver_reply(&mut self, outcome: ReplyOutcome) {
        match outcome {
            Ok(reply) => self.forward(reply),
            Err((reply_address, err)) => self.report(&err, Some(&reply_address)),
        }
    }

    fn forward(&mut self, message: BusMessage) {
        if let Some(reply_address) = &message.reply_address {
            let expires = Instant::now() + self.bridge.config.reply_timeout_duration();
            self.awaiting_replies.insert(reply_address.clone(), expires);
        }
        let frame = encode_delivery(
            &message.address,
            &message.body,
            message.reply_address.as_deref(),
        );
        if let Err(err) = self.handle.send(frame) {
            debug!("Delivery to {} dropped: {}", self.handle.id(), err);
        }
    }

    fn ping(&mut self, period: Duration) {
        let now = Instant::now();
        if now.duration_since(self.last_received) >= period * 2 {
            info!("Closing silent bridged socket {}", self.handle.id());
            self.handle.close();
            return;
        }
        let _ = self.handle.send(PING_FRAME);
        self.awaiting_replies.retain(|_, expires| *expires > now);
        self.auth_cache.prune(now);
    }

    fn report(&self, err: &BridgeError, address: Option<&str>) {
        let _ = self.handle.send(encode_error(err.code(), address));
    }

    async fn unregister_all(&mut self) {
        let registrations: Vec<_> = self.registrations.drain().collect();
        for (id, address) in registrations {
            self.bridge.bus.unsubscribe(id);
            self.handle.hook().unregister(&self.handle, &address).await;
        }
    }
}
