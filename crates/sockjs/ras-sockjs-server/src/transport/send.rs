//! Send-only HTTP transports

use super::TransportContext;
use crate::http::{self, CONTENT_TYPE_PLAIN};
use crate::ServerError;
use axum::{
    body::Bytes,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use ras_sockjs_types::{
    FramingError, SessionId, SockJsError, TransportKind, decode_form_payload, decode_messages,
};
use tracing::debug;

/// Deliver the payload of `xhr_send` or `jsonp_send` to session `id`
///
/// Send requests never create sessions.
pub(crate) fn handle(
    ctx: &TransportContext,
    id: SessionId,
    kind: TransportKind,
    body: Bytes,
) -> Response {
    let payload = match kind {
        TransportKind::JsonpSend => {
            let content_type = ctx
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok());
            decode_form_payload(&body, content_type)
        }
        _ => String::from_utf8(body.to_vec()).map_err(|_| FramingError::BrokenJson),
    };

    let messages = match payload.and_then(|payload| decode_messages(&payload)) {
        Ok(messages) => messages,
        Err(err) => {
            debug!(session_id = %id, error = %err, "rejected send payload");
            return ServerError::from(SockJsError::from(err)).into_response();
        }
    };

    let Some(session) = ctx.existing_session(&id) else {
        return ServerError::from(SockJsError::UnknownSession(id)).into_response();
    };
    if let Err(err) = session.receive(messages) {
        return ServerError::from(err).into_response();
    }

    let mut headers = http::transport_headers(&ctx.app, &ctx.headers, CONTENT_TYPE_PLAIN);
    match kind {
        TransportKind::JsonpSend => (StatusCode::OK, headers, "ok").into_response(),
        _ => {
            headers.remove(header::CACHE_CONTROL);
            (StatusCode::NO_CONTENT, headers).into_response()
        }
    }
}
