//! WebSocket transports: SockJS framed and raw

use super::TransportContext;
use crate::session::{Attach, Outbound, TransportLease};
use axum::{
    body::Bytes,
    extract::ws::{self, Message, WebSocket, WebSocketUpgrade},
    response::Response,
};
use ras_sockjs_types::{CloseFrame, Frame, FramingError, SessionId, TransportKind, decode_messages};
use tracing::{debug, info, warn};

pub(crate) fn framed(ctx: TransportContext, id: SessionId, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| run_framed(ctx, id, socket))
}

pub(crate) fn raw(ctx: TransportContext, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| run_raw(ctx, socket))
}

async fn send_text(socket: &mut WebSocket, text: String) -> bool {
    socket.send(Message::Text(text.into())).await.is_ok()
}

async fn send_close(socket: &mut WebSocket, close: &CloseFrame) {
    let frame = ws::CloseFrame {
        code: close.code,
        reason: close.reason.clone().into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

/// Refuse the connection with a close frame, SockJS style
async fn reject(mut socket: WebSocket, close: CloseFrame) {
    if send_text(&mut socket, Frame::Open.encode()).await {
        let _ = send_text(&mut socket, Frame::Close(close.clone()).encode()).await;
    }
    send_close(&mut socket, &close).await;
}

async fn run_framed(ctx: TransportContext, id: SessionId, mut socket: WebSocket) {
    if ctx.existing_session(&id).is_none() {
        if let Some(close) = ctx.registry.tombstone(&id) {
            reject(socket, close).await;
            return;
        }
    }

    let (session, _) = ctx.session(&id);
    if session.prefix() != ctx.app.prefix() {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    let mut lease = match session.attach(TransportKind::WebSocket) {
        Attach::Lease(lease) => lease,
        Attach::Rejected(close) => {
            reject(socket, close).await;
            return;
        }
    };

    if lease.needs_open() {
        if !send_text(&mut socket, Frame::Open.encode()).await {
            return;
        }
        ctx.open(&mut lease);
    }
    info!("WebSocket attached: {}", id);

    loop {
        tokio::select! {
            outbound = lease.recv() => {
                let closing = match &outbound {
                    Outbound::Close(close) => Some(close.clone()),
                    _ => None,
                };
                if !send_text(&mut socket, outbound.into_frame().encode()).await {
                    break;
                }
                if let Some(close) = closing {
                    lease.close_delivered();
                    send_close(&mut socket, &close).await;
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if !deliver_framed(&lease, text.as_str()) {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(session_id = %id, "websocket closed by peer");
                    break;
                }
                Some(Err(err)) => {
                    debug!(session_id = %id, error = %err, "websocket error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    info!("WebSocket detached: {}", id);
}

/// Returns false when the connection must be dropped
fn deliver_framed(lease: &TransportLease, payload: &str) -> bool {
    match decode_messages(payload) {
        Ok(messages) => {
            if let Err(err) = lease.session().receive(messages) {
                debug!(error = %err, "inbound frame after close");
            }
            true
        }
        // Empty frames are keep-alives from some clients
        Err(FramingError::PayloadExpected) => true,
        Err(err) => {
            warn!(session_id = %lease.session().id(), error = %err, "malformed websocket frame");
            false
        }
    }
}

async fn run_raw(ctx: TransportContext, mut socket: WebSocket) {
    let id = SessionId::generate();
    let (session, _) = ctx.session(&id);
    let mut lease = match session.attach(TransportKind::RawWebSocket) {
        Attach::Lease(lease) => lease,
        Attach::Rejected(close) => {
            send_close(&mut socket, &close).await;
            return;
        }
    };
    ctx.open(&mut lease);
    info!("Raw WebSocket attached: {}", id);

    loop {
        tokio::select! {
            outbound = lease.recv() => match outbound {
                Outbound::Messages(messages) => {
                    let mut ok = true;
                    for message in messages {
                        if socket.send(Message::Text(message.into())).await.is_err() {
                            ok = false;
                            break;
                        }
                    }
                    if !ok {
                        break;
                    }
                }
                Outbound::Heartbeat => {
                    if socket.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close(close) => {
                    lease.close_delivered();
                    send_close(&mut socket, &close).await;
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = lease.session().receive(vec![text.to_string()]);
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    info!("Raw WebSocket detached: {}", id);
}
