//! Static endpoints and shared response headers

use crate::app::Application;
use axum::{
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use ras_sockjs_types::TransportKind;
use serde::Serialize;
use sha2::{Digest, Sha256};

pub(crate) const CONTENT_TYPE_PLAIN: &str = "text/plain; charset=UTF-8";
pub(crate) const CONTENT_TYPE_JSON: &str = "application/json; charset=UTF-8";
const ONE_YEAR_SECONDS: u32 = 365 * 24 * 60 * 60;

const GREETING: &str = "Welcome to SockJS!\n";

const IFRAME_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta http-equiv="X-UA-Compatible" content="IE=edge" />
  <meta http-equiv="Content-Type" content="text/html; charset=UTF-8" />
  <script>
    document.domain = document.domain;
    _sockjs_onload = function(){SockJS.bootstrap_iframe();};
  </script>
  <script src="{{ library_url }}"></script>
</head>
<body>
  <h2>Don't panic!</h2>
  <p>This is a SockJS hidden iframe. It's used for cross domain magic.</p>
</body>
</html>"#;

/// Body of `GET /info`
#[derive(Debug, Serialize)]
pub(crate) struct InfoResponse {
    pub websocket: bool,
    pub cookie_needed: bool,
    pub origins: Vec<&'static str>,
    pub entropy: u32,
}

impl InfoResponse {
    pub(crate) fn for_app(app: &Application) -> Self {
        Self {
            websocket: app.config().is_enabled(TransportKind::WebSocket),
            cookie_needed: app.config().insert_jsessionid,
            origins: vec!["*:*"],
            entropy: rand::random(),
        }
    }
}

pub(crate) fn greeting() -> Response {
    let mut headers = HeaderMap::new();
    set_content_type(&mut headers, CONTENT_TYPE_PLAIN);
    (StatusCode::OK, headers, GREETING).into_response()
}

pub(crate) fn info(app: &Application, request: &HeaderMap) -> Response {
    let mut headers = HeaderMap::new();
    set_content_type(&mut headers, CONTENT_TYPE_JSON);
    no_cache(&mut headers);
    cors(request, &mut headers);

    match serde_json::to_string(&InfoResponse::for_app(app)) {
        Ok(body) => (StatusCode::OK, headers, body).into_response(),
        Err(err) => crate::ServerError::from(err).into_response(),
    }
}

pub(crate) fn iframe(app: &Application, request: &HeaderMap) -> Response {
    let body = IFRAME_TEMPLATE.replace("{{ library_url }}", &app.config().library_url);
    let etag = format!("\"{:x}\"", Sha256::digest(body.as_bytes()));

    let mut headers = HeaderMap::new();
    cache_for_year(&mut headers);
    if let Ok(value) = HeaderValue::from_str(&etag) {
        headers.insert(header::ETAG, value);
    }

    let not_modified = request
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(|value| value == etag)
        .unwrap_or(false);
    if not_modified {
        return (StatusCode::NOT_MODIFIED, headers).into_response();
    }

    set_content_type(&mut headers, "text/html; charset=UTF-8");
    (StatusCode::OK, headers, body).into_response()
}

/// Answer a CORS preflight for an endpoint accepting `methods`
pub(crate) fn preflight(request: &HeaderMap, methods: &'static str) -> Response {
    let mut headers = HeaderMap::new();
    cache_for_year(&mut headers);
    cors(request, &mut headers);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(methods),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from(ONE_YEAR_SECONDS),
    );
    (StatusCode::NO_CONTENT, headers).into_response()
}

pub(crate) fn set_content_type(headers: &mut HeaderMap, content_type: &'static str) {
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
}

pub(crate) fn no_cache(headers: &mut HeaderMap) {
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate, max-age=0"),
    );
}

fn cache_for_year(headers: &mut HeaderMap) {
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000"),
    );
}

/// Reflect the caller's origin so credentialed XHR works cross-domain
pub(crate) fn cors(request: &HeaderMap, headers: &mut HeaderMap) {
    let origin = request
        .get(header::ORIGIN)
        .filter(|origin| origin.as_bytes() != b"null")
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    if let Some(requested) = request.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
    }
}

/// Set the sticky-session cookie when the application asks for it
pub(crate) fn session_cookie(app: &Application, request: &HeaderMap, headers: &mut HeaderMap) {
    if !app.config().insert_jsessionid {
        return;
    }

    let value = request_cookie(request, "JSESSIONID").unwrap_or_else(|| "dummy".to_string());
    let cookie = HeaderValue::from_str(&format!("JSESSIONID={}; path=/", value))
        .unwrap_or_else(|_| HeaderValue::from_static("JSESSIONID=dummy; path=/"));
    headers.insert(header::SET_COOKIE, cookie);
}

fn request_cookie(request: &HeaderMap, name: &str) -> Option<String> {
    request
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Headers every session transport response carries
pub(crate) fn transport_headers(
    app: &Application,
    request: &HeaderMap,
    content_type: &'static str,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    set_content_type(&mut headers, content_type);
    no_cache(&mut headers);
    cors(request, &mut headers);
    session_cookie(app, request, &mut headers);
    headers
}
