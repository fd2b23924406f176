//! The logical session: a duplex channel that outlives its transports
//!
//! A [`Session`] owns the outbound queue and the state machine. Transports
//! borrow it through a [`TransportLease`]: at most one lease is live at a
//! time, frames are drained from the queue only through that lease, and
//! dropping the lease is the detach. Because every mutation happens under the
//! session's own lock and the queue is only ever drained front-first, frames
//! reach the remote in enqueue order no matter how often transports swap.

use crate::registry::SessionRegistry;
use axum::http::HeaderMap;
use parking_lot::Mutex;
use ras_sockjs_types::{CloseFrame, Frame, SessionId, SessionState, SockJsError, TransportKind};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

/// Request metadata captured when a session is created
#[derive(Debug, Clone, Default)]
pub struct ConnectionOrigin {
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
}

/// Outcome of a transport trying to attach
pub enum Attach {
    /// The transport now owns delivery for the session
    Lease(TransportLease),
    /// The transport must answer with this frame and go away
    Rejected(CloseFrame),
}

/// What an attached transport should write next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Messages(Vec<String>),
    Heartbeat,
    Close(CloseFrame),
}

impl Outbound {
    pub fn is_close(&self) -> bool {
        matches!(self, Outbound::Close(_))
    }

    pub fn into_frame(self) -> Frame {
        match self {
            Outbound::Messages(messages) => Frame::Messages(messages),
            Outbound::Heartbeat => Frame::Heartbeat,
            Outbound::Close(close) => Frame::Close(close),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Attached {
    lease: u64,
    kind: TransportKind,
}

struct SessionInner {
    state: SessionState,
    outbound: VecDeque<String>,
    attached: Option<Attached>,
    next_lease: u64,
    last_activity: Instant,
    last_sent: Instant,
    close_frame: Option<CloseFrame>,
    inbound_tx: Option<mpsc::UnboundedSender<String>>,
    inbound_rx: Option<mpsc::UnboundedReceiver<String>>,
    opened_with: Option<TransportKind>,
}

/// A logical SockJS session
pub struct Session {
    id: SessionId,
    prefix: String,
    origin: ConnectionOrigin,
    session_timeout: Duration,
    heartbeat_period: Duration,
    inner: Mutex<SessionInner>,
    wake: Notify,
    state_tx: watch::Sender<SessionState>,
    registry: Weak<SessionRegistry>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("prefix", &self.prefix)
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    /// Create a session in the CONNECTING state
    pub fn new(
        id: SessionId,
        prefix: impl Into<String>,
        session_timeout: Duration,
        heartbeat_period: Duration,
        origin: ConnectionOrigin,
        registry: Weak<SessionRegistry>,
    ) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(SessionState::Connecting);
        let now = Instant::now();

        Arc::new(Self {
            id,
            prefix: prefix.into(),
            origin,
            session_timeout,
            heartbeat_period,
            inner: Mutex::new(SessionInner {
                state: SessionState::Connecting,
                outbound: VecDeque::new(),
                attached: None,
                next_lease: 0,
                last_activity: now,
                last_sent: now,
                close_frame: None,
                inbound_tx: Some(inbound_tx),
                inbound_rx: Some(inbound_rx),
                opened_with: None,
            }),
            wake: Notify::new(),
            state_tx,
            registry,
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Routing prefix of the application that owns the session
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn origin(&self) -> &ConnectionOrigin {
        &self.origin
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn attached_transport(&self) -> Option<TransportKind> {
        self.inner.lock().attached.map(|a| a.kind)
    }

    /// The transport that delivered the open frame
    pub fn opened_with(&self) -> Option<TransportKind> {
        self.inner.lock().opened_with
    }

    /// Number of frames buffered for the next transport
    pub fn pending_outbound(&self) -> usize {
        self.inner.lock().outbound.len()
    }

    pub fn last_activity(&self) -> Instant {
        self.inner.lock().last_activity
    }

    pub(crate) fn close_frame(&self) -> Option<CloseFrame> {
        self.inner.lock().close_frame.clone()
    }

    /// Try to bind a transport to the session
    pub fn attach(self: &Arc<Self>, kind: TransportKind) -> Attach {
        let mut inner = self.inner.lock();

        match (inner.state, inner.attached) {
            (SessionState::Closed, _) | (SessionState::Closing, Some(_)) => {
                return Attach::Rejected(inner.close_frame.clone().unwrap_or_default());
            }
            (_, Some(current)) => {
                debug!(
                    session_id = %self.id,
                    attached = %current.kind,
                    rejected = %kind,
                    "second receiver while one is attached"
                );
                return Attach::Rejected(CloseFrame::another_connection_open());
            }
            _ => {}
        }

        inner.next_lease += 1;
        let lease = inner.next_lease;
        inner.attached = Some(Attached { lease, kind });
        let now = Instant::now();
        inner.last_activity = now;
        inner.last_sent = now;
        let needs_open = inner.state == SessionState::Connecting;

        debug!(session_id = %self.id, transport = %kind, lease, "transport attached");
        Attach::Lease(TransportLease {
            session: Arc::clone(self),
            id: lease,
            kind,
            needs_open,
        })
    }

    /// Queue a message for the remote
    ///
    /// Delivered immediately if a transport is attached, otherwise buffered
    /// for the next one.
    pub fn send(&self, message: String) -> Result<(), SockJsError> {
        {
            let mut inner = self.inner.lock();
            if !inner.state.is_active() {
                return Err(SockJsError::SessionClosed(self.id.clone()));
            }
            inner.outbound.push_back(message);
        }
        self.wake.notify_one();
        Ok(())
    }

    /// Hand inbound frames to the application, in order
    pub fn receive(&self, messages: Vec<String>) -> Result<(), SockJsError> {
        let mut inner = self.inner.lock();
        if !inner.state.is_active() {
            return Err(SockJsError::SessionClosed(self.id.clone()));
        }
        inner.last_activity = Instant::now();

        let Some(tx) = inner.inbound_tx.as_ref() else {
            return Err(SockJsError::SessionClosed(self.id.clone()));
        };
        for message in messages {
            if tx.send(message).is_err() {
                // The application stopped reading; nothing left to deliver to
                break;
            }
        }
        Ok(())
    }

    /// Begin closing the session
    ///
    /// With a transport attached the session waits in CLOSING until the close
    /// frame is written; otherwise it is CLOSED at once.
    pub fn close(&self, frame: CloseFrame) {
        let finished = {
            let mut inner = self.inner.lock();
            if !inner.state.is_active() {
                return;
            }
            debug!(session_id = %self.id, code = frame.code, "closing session");
            inner.close_frame = Some(frame);
            inner.inbound_tx = None;
            if inner.attached.is_some() {
                self.set_state(&mut inner, SessionState::Closing);
                false
            } else {
                self.set_state(&mut inner, SessionState::Closed);
                true
            }
        };

        if finished {
            self.finish();
        } else {
            self.wake.notify_one();
        }
    }

    /// Resolves once the session has reached CLOSED
    pub async fn closed(&self) {
        let mut rx = self.state_tx.subscribe();
        let _ = rx.wait_for(|state| *state == SessionState::Closed).await;
    }

    /// Close the session if it has been without a transport for longer than
    /// the session timeout. Returns whether the registry should evict it.
    pub(crate) fn expire(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Closed {
            return true;
        }
        if inner.attached.is_some() || now < inner.last_activity + self.session_timeout {
            return false;
        }

        if inner.close_frame.is_none() {
            inner.close_frame = Some(CloseFrame::go_away());
        }
        inner.inbound_tx = None;
        inner.outbound.clear();
        self.set_state(&mut inner, SessionState::Closed);
        info!(session_id = %self.id, "session timed out");
        true
    }

    fn detach(&self, lease: u64) {
        let finished = {
            let mut inner = self.inner.lock();
            let kind = match inner.attached {
                Some(current) if current.lease == lease => current.kind,
                _ => return,
            };
            inner.attached = None;
            inner.last_activity = Instant::now();
            debug!(session_id = %self.id, transport = %kind, lease, "transport detached");

            if kind.closes_session_on_detach() && inner.state != SessionState::Closed {
                if inner.close_frame.is_none() {
                    inner.close_frame = Some(CloseFrame::interrupted());
                }
                inner.inbound_tx = None;
                self.set_state(&mut inner, SessionState::Closed);
                true
            } else {
                false
            }
        };

        if finished {
            self.finish();
        }
    }

    fn set_state(&self, inner: &mut SessionInner, state: SessionState) {
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    fn finish(&self) {
        info!(session_id = %self.id, "session closed");
        if let Some(registry) = self.registry.upgrade() {
            registry.retire(self);
        }
    }
}

/// A transport's exclusive, revocable hold on a session
///
/// Dropping the lease detaches the transport.
pub struct TransportLease {
    session: Arc<Session>,
    id: u64,
    kind: TransportKind,
    needs_open: bool,
}

impl TransportLease {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Whether this transport must deliver the open frame first
    pub fn needs_open(&self) -> bool {
        self.needs_open
    }

    /// Record that the open frame reached the transport
    ///
    /// Moves the session to OPEN and hands out the inbound receiver, exactly
    /// once per session.
    pub fn mark_open(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.needs_open = false;
        let mut inner = self.session.inner.lock();
        if inner.state != SessionState::Connecting {
            return None;
        }
        inner.opened_with = Some(self.kind);
        inner.last_sent = Instant::now();
        self.session.set_state(&mut inner, SessionState::Open);
        info!(session_id = %self.session.id, transport = %self.kind, "session opened");
        inner.inbound_rx.take()
    }

    /// Wait for the next thing to write
    ///
    /// Buffered messages are drained in one batch, ahead of any pending close.
    /// When nothing has been written for a heartbeat period a heartbeat is
    /// returned instead. Cancelling the future loses nothing.
    pub async fn recv(&self) -> Outbound {
        loop {
            let mut notified = pin!(self.session.wake.notified());
            notified.as_mut().enable();

            let deadline = {
                let mut inner = self.session.inner.lock();
                if !inner.outbound.is_empty() {
                    let batch: Vec<String> = inner.outbound.drain(..).collect();
                    inner.last_sent = Instant::now();
                    return Outbound::Messages(batch);
                }
                if matches!(inner.state, SessionState::Closing | SessionState::Closed) {
                    return Outbound::Close(inner.close_frame.clone().unwrap_or_default());
                }
                inner.last_sent + self.session.heartbeat_period
            };

            tokio::select! {
                _ = &mut notified => continue,
                _ = sleep_until(deadline) => {
                    let mut inner = self.session.inner.lock();
                    if !inner.outbound.is_empty() {
                        continue;
                    }
                    inner.last_sent = Instant::now();
                    return Outbound::Heartbeat;
                }
            }
        }
    }

    /// Record that the close frame was written; CLOSING becomes CLOSED
    pub fn close_delivered(&self) {
        let finished = {
            let mut inner = self.session.inner.lock();
            if inner.state == SessionState::Closing {
                self.session.set_state(&mut inner, SessionState::Closed);
                true
            } else {
                false
            }
        };
        if finished {
            self.session.finish();
        }
    }
}

impl Drop for TransportLease {
    fn drop(&mut self) {
        self.session.detach(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> Arc<Session> {
        Session::new(
            SessionId::parse(id).unwrap(),
            "/echo",
            Duration::from_millis(5_000),
            Duration::from_millis(25_000),
            ConnectionOrigin::default(),
            Weak::new(),
        )
    }

    fn lease(session: &Arc<Session>, kind: TransportKind) -> TransportLease {
        match session.attach(kind) {
            Attach::Lease(lease) => lease,
            Attach::Rejected(frame) => panic!("attach rejected with {:?}", frame),
        }
    }

    #[tokio::test]
    async fn test_open_on_first_attach() {
        let session = session("s1");
        assert_eq!(session.state(), SessionState::Connecting);

        let mut first = lease(&session, TransportKind::XhrPolling);
        assert!(first.needs_open());
        assert!(first.mark_open().is_some());
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.opened_with(), Some(TransportKind::XhrPolling));
        drop(first);

        let mut second = lease(&session, TransportKind::XhrPolling);
        assert!(!second.needs_open());
        assert!(second.mark_open().is_none());
    }

    #[tokio::test]
    async fn test_second_receiver_is_rejected() {
        let session = session("s2");
        let _held = lease(&session, TransportKind::XhrStreaming);

        match session.attach(TransportKind::XhrPolling) {
            Attach::Rejected(frame) => assert_eq!(frame, CloseFrame::another_connection_open()),
            Attach::Lease(_) => panic!("second transport must not attach"),
        }
    }

    #[tokio::test]
    async fn test_order_preserved_across_reattach() {
        let session = session("s3");
        let mut first = lease(&session, TransportKind::XhrPolling);
        first.mark_open();

        session.send("one".to_string()).unwrap();
        session.send("two".to_string()).unwrap();
        assert_eq!(
            first.recv().await,
            Outbound::Messages(vec!["one".to_string(), "two".to_string()])
        );
        drop(first);

        // Buffered while detached
        session.send("three".to_string()).unwrap();
        session.send("four".to_string()).unwrap();
        assert_eq!(session.pending_outbound(), 2);

        let second = lease(&session, TransportKind::XhrStreaming);
        assert_eq!(
            second.recv().await,
            Outbound::Messages(vec!["three".to_string(), "four".to_string()])
        );
        session.send("five".to_string()).unwrap();
        assert_eq!(
            second.recv().await,
            Outbound::Messages(vec!["five".to_string()])
        );
        assert_eq!(session.pending_outbound(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_when_idle() {
        let session = session("s4");
        let mut transport = lease(&session, TransportKind::XhrStreaming);
        transport.mark_open();

        let started = Instant::now();
        assert_eq!(transport.recv().await, Outbound::Heartbeat);
        assert!(started.elapsed() >= Duration::from_millis(25_000));
    }

    #[tokio::test]
    async fn test_inbound_delivered_in_order() {
        let session = session("s5");
        let mut transport = lease(&session, TransportKind::XhrPolling);
        let mut inbound = transport.mark_open().unwrap();

        session
            .receive(vec!["a".to_string(), "b".to_string()])
            .unwrap();
        session.receive(vec!["c".to_string()]).unwrap();

        assert_eq!(inbound.recv().await.as_deref(), Some("a"));
        assert_eq!(inbound.recv().await.as_deref(), Some("b"));
        assert_eq!(inbound.recv().await.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_close_without_transport_is_immediate() {
        let session = session("s6");
        let mut transport = lease(&session, TransportKind::XhrPolling);
        let mut inbound = transport.mark_open().unwrap();
        drop(transport);

        session.close(CloseFrame::go_away());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(inbound.recv().await.is_none());
        assert!(session.send("late".to_string()).is_err());
        assert!(session.receive(vec!["late".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_close_with_transport_waits_for_delivery() {
        let session = session("s7");
        let mut transport = lease(&session, TransportKind::XhrStreaming);
        transport.mark_open();

        session.send("bye".to_string()).unwrap();
        session.close(CloseFrame::new(3000, "Go away!"));
        assert_eq!(session.state(), SessionState::Closing);

        // Pending data goes out before the close frame
        assert_eq!(
            transport.recv().await,
            Outbound::Messages(vec!["bye".to_string()])
        );
        assert_eq!(
            transport.recv().await,
            Outbound::Close(CloseFrame::go_away())
        );
        transport.close_delivered();
        assert_eq!(session.state(), SessionState::Closed);
        session.closed().await;
    }

    #[tokio::test]
    async fn test_websocket_detach_closes_session() {
        let session = session("s8");
        let mut transport = lease(&session, TransportKind::WebSocket);
        transport.mark_open();
        drop(transport);

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.close_frame(), Some(CloseFrame::interrupted()));
    }

    #[tokio::test]
    async fn test_polling_detach_keeps_session() {
        let session = session("s9");
        let mut transport = lease(&session, TransportKind::XhrPolling);
        transport.mark_open();
        drop(transport);

        assert_eq!(session.state(), SessionState::Open);
        assert!(session.attached_transport().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_respects_timeout() {
        let session = session("s10");
        let mut transport = lease(&session, TransportKind::XhrPolling);
        transport.mark_open();

        // Attached sessions never expire
        tokio::time::advance(Duration::from_millis(10_000)).await;
        assert!(!session.expire(Instant::now()));

        drop(transport);
        tokio::time::advance(Duration::from_millis(4_999)).await;
        assert!(!session.expire(Instant::now()));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(session.expire(Instant::now()));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_stale_lease_drop_is_ignored() {
        let session = session("s11");
        let mut first = lease(&session, TransportKind::XhrPolling);
        first.mark_open();
        drop(first);

        let _second = lease(&session, TransportKind::XhrPolling);
        // Re-running a detach for the first lease must not unbind the second
        session.detach(1);
        assert_eq!(
            session.attached_transport(),
            Some(TransportKind::XhrPolling)
        );
    }
}
