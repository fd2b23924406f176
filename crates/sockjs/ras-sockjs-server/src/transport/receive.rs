//! Receiving HTTP transports: polling and streaming

use super::TransportContext;
use super::envelope::Envelope;
use crate::http;
use crate::session::{Attach, TransportLease};
use crate::{ServerError, ServerResult};
use axum::{
    body::Body,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use ras_sockjs_types::{Frame, SessionId, SockJsError, TransportKind, validate_callback};
use std::convert::Infallible;
use tracing::debug;

/// Pick the envelope for a receiving transport, validating its callback
pub(crate) fn envelope_for(ctx: &TransportContext, kind: TransportKind) -> ServerResult<Envelope> {
    let callback = || -> ServerResult<String> {
        let param = ctx.query_param("c");
        validate_callback(param.as_deref())
            .map(str::to_string)
            .map_err(|err| SockJsError::from(err).into())
    };

    match kind {
        TransportKind::XhrPolling => Ok(Envelope::Xhr),
        TransportKind::XhrStreaming => Ok(Envelope::XhrStreaming),
        TransportKind::EventSource => Ok(Envelope::EventSource),
        TransportKind::HtmlFile => Ok(Envelope::HtmlFile {
            callback: callback()?,
        }),
        TransportKind::JsonpPolling => Ok(Envelope::Jsonp {
            callback: callback()?,
        }),
        _ => Err(ServerError::NotFound),
    }
}

/// Attach a receiving request to session `id` and answer with its frames
pub(crate) async fn handle(ctx: TransportContext, id: SessionId, kind: TransportKind) -> Response {
    let envelope = match envelope_for(&ctx, kind) {
        Ok(envelope) => envelope,
        Err(err) => return err.into_response(),
    };
    let headers = http::transport_headers(&ctx.app, &ctx.headers, envelope.content_type());

    if ctx.existing_session(&id).is_none() {
        if let Some(frame) = ctx.registry.tombstone(&id) {
            debug!(session_id = %id, "receive for a recently closed session");
            return respond_once(headers, &envelope, Frame::Close(frame));
        }
    }

    let (session, created) = ctx.session(&id);
    if session.prefix() != ctx.app.prefix() {
        return ServerError::NotFound.into_response();
    }
    if created {
        debug!(session_id = %id, transport = %kind, "handshake");
    }

    let lease = match session.attach(kind) {
        Attach::Lease(lease) => lease,
        Attach::Rejected(frame) => return respond_once(headers, &envelope, Frame::Close(frame)),
    };

    if kind.is_streaming() {
        stream(&ctx, lease, envelope, headers)
    } else {
        poll(&ctx, lease, envelope, headers).await
    }
}

fn respond_once(headers: HeaderMap, envelope: &Envelope, frame: Frame) -> Response {
    let mut body = envelope.prelude().unwrap_or_default();
    body.push_str(&envelope.wrap(&frame));
    (StatusCode::OK, headers, body).into_response()
}

/// One batch per request: the open frame, buffered messages, a heartbeat or
/// the close frame
async fn poll(
    ctx: &TransportContext,
    mut lease: TransportLease,
    envelope: Envelope,
    headers: HeaderMap,
) -> Response {
    let body = if lease.needs_open() {
        ctx.open(&mut lease);
        envelope.wrap(&Frame::Open)
    } else {
        let outbound = lease.recv().await;
        let closing = outbound.is_close();
        let body = envelope.wrap(&outbound.into_frame());
        if closing {
            lease.close_delivered();
        }
        body
    };

    drop(lease);
    (StatusCode::OK, headers, body).into_response()
}

struct StreamState {
    lease: Option<TransportLease>,
    envelope: Envelope,
    first: Option<String>,
    sent: usize,
    limit: usize,
}

/// Frames appended to one response until the byte budget is spent
fn stream(
    ctx: &TransportContext,
    mut lease: TransportLease,
    envelope: Envelope,
    headers: HeaderMap,
) -> Response {
    let mut first = envelope.prelude().unwrap_or_default();
    let mut sent = 0;
    if lease.needs_open() {
        ctx.open(&mut lease);
        let open = envelope.wrap(&Frame::Open);
        sent += open.len();
        first.push_str(&open);
    }

    let state = StreamState {
        lease: Some(lease),
        envelope,
        first: Some(first),
        sent,
        limit: ctx.app.config().max_bytes_streaming,
    };

    let frames = futures::stream::unfold(state, |mut state| async move {
        if let Some(first) = state.first.take() {
            return Some((Ok::<_, Infallible>(first), state));
        }

        let lease = state.lease.as_ref()?;
        let outbound = lease.recv().await;
        let closing = outbound.is_close();
        let chunk = state.envelope.wrap(&outbound.into_frame());
        state.sent += chunk.len();

        if closing {
            lease.close_delivered();
            state.lease = None;
        } else if state.sent >= state.limit {
            debug!(
                session_id = %lease.session().id(),
                bytes = state.sent,
                "streaming budget spent, rotating"
            );
            state.lease = None;
        }
        Some((Ok(chunk), state))
    });

    (StatusCode::OK, headers, Body::from_stream(frames)).into_response()
}
