//! Protocol tests against a live listener
//!
//! Each test binds its own server on an ephemeral port and talks to it the way
//! a SockJS client would: reqwest for the HTTP transports and
//! tokio-tungstenite for the WebSocket ones.

use futures::{SinkExt, StreamExt};
use ras_sockjs_server::{
    ServerOptions, SessionId, SockJsConfig, SockJsHandler, SockJsServer, SockJsSocket,
    TransportKind, handler_fn,
};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

fn echo() -> impl SockJsHandler {
    handler_fn(|mut socket: SockJsSocket| async move {
        while let Some(message) = socket.recv().await {
            if socket.send(message).is_err() {
                break;
            }
        }
    })
}

fn closer() -> impl SockJsHandler {
    handler_fn(|socket: SockJsSocket| async move {
        socket.close();
    })
}

async fn create_test_server() -> (String, SockJsServer, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to port");
    let addr = listener.local_addr().expect("Failed to get local addr");
    let base_url = format!("http://127.0.0.1:{}", addr.port());

    let server = SockJsServer::with_options(ServerOptions::builder().sweep_interval(50).build());
    server
        .install_app(
            SockJsConfig::builder()
                .prefix("/echo")
                .insert_jsessionid(false)
                .heartbeat_period(300)
                .build(),
            echo(),
        )
        .unwrap();
    server
        .install_app(SockJsConfig::builder().prefix("/close").build(), closer())
        .unwrap();
    server
        .install_app(
            SockJsConfig::builder()
                .prefix("/disabled_websocket_echo")
                .disabled_transports(vec![TransportKind::WebSocket])
                .build(),
            echo(),
        )
        .unwrap();
    server
        .install_app(
            SockJsConfig::builder()
                .prefix("/cookie_needed_echo")
                .insert_jsessionid(true)
                .build(),
            echo(),
        )
        .unwrap();
    server
        .install_app(
            SockJsConfig::builder()
                .prefix("/streaming_echo")
                .max_bytes_streaming(64)
                .build(),
            echo(),
        )
        .unwrap();
    server
        .install_app(
            SockJsConfig::builder()
                .prefix("/short")
                .session_timeout(200)
                .build(),
            echo(),
        )
        .unwrap();

    let app = server.router();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (base_url, server, handle)
}

async fn post(url: &str, body: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(url)
        .body(body.to_string())
        .send()
        .await
        .unwrap()
}

async fn post_text(url: &str, body: &str) -> (u16, String) {
    let response = post(url, body).await;
    let status = response.status().as_u16();
    (status, response.text().await.unwrap())
}

#[tokio::test]
async fn test_greeting_and_info() {
    let (base_url, _server, _handle) = create_test_server().await;

    let response = reqwest::get(format!("{}/echo", base_url)).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "Welcome to SockJS!\n");

    let response = reqwest::get(format!("{}/echo/", base_url)).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "Welcome to SockJS!\n");

    let response = reqwest::get(format!("{}/echo/info", base_url)).await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(
        response
            .headers()
            .get("cache-control")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("no-cache")
    );
    let info: serde_json::Value = response.json().await.unwrap();
    assert_eq!(info["websocket"], true);
    assert_eq!(info["cookie_needed"], false);
    assert_eq!(info["origins"], serde_json::json!(["*:*"]));
    assert!(info["entropy"].is_number());

    let info: serde_json::Value = reqwest::get(format!("{}/disabled_websocket_echo/info", base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["websocket"], false);

    let response = reqwest::get(format!("{}/nowhere", base_url)).await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_xhr_polling_echo_and_heartbeat() {
    let (base_url, _server, _handle) = create_test_server().await;
    let session_url = format!("{}/echo/000/abc123", base_url);

    let (status, body) = post_text(&format!("{}/xhr", session_url), "").await;
    assert_eq!(status, 200);
    assert_eq!(body, "o\n");

    let response = post(&format!("{}/xhr_send", session_url), r#"["hello"]"#).await;
    assert_eq!(response.status(), 204);

    let (_, body) = post_text(&format!("{}/xhr", session_url), "").await;
    assert_eq!(body, "a[\"hello\"]\n");

    // Nothing pending: the poll is held until the heartbeat is due
    let started = Instant::now();
    let (_, body) = post_text(&format!("{}/xhr", session_url), "").await;
    assert_eq!(body, "h\n");
    assert!(started.elapsed() >= Duration::from_millis(250));
}

#[tokio::test]
async fn test_order_preserved_across_polls() {
    let (base_url, _server, _handle) = create_test_server().await;
    let session_url = format!("{}/echo/000/order", base_url);

    post_text(&format!("{}/xhr", session_url), "").await;
    post(&format!("{}/xhr_send", session_url), r#"["a","b"]"#).await;
    post(&format!("{}/xhr_send", session_url), r#"["c"]"#).await;
    // Let the handler echo everything before polling
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (_, body) = post_text(&format!("{}/xhr", session_url), "").await;
    assert_eq!(body, "a[\"a\",\"b\",\"c\"]\n");

    post(&format!("{}/xhr_send", session_url), r#"["d"]"#).await;
    post(&format!("{}/xhr_send", session_url), r#"["e"]"#).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (_, body) = post_text(&format!("{}/xhr", session_url), "").await;
    assert_eq!(body, "a[\"d\",\"e\"]\n");
}

#[tokio::test]
async fn test_dropped_poll_keeps_session() {
    let (base_url, _server, _handle) = create_test_server().await;
    let path = "/disabled_websocket_echo/000/dropped";
    let session_url = format!("{}{}", base_url, path);

    let (_, body) = post_text(&format!("{}/xhr", session_url), "").await;
    assert_eq!(body, "o\n");

    // A poll that is abandoned while the server holds it open
    let mut stream = TcpStream::connect(base_url.trim_start_matches("http://"))
        .await
        .unwrap();
    let request = format!(
        "POST {}/xhr HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n",
        path
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(stream);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = post(&format!("{}/xhr_send", session_url), r#"["m1"]"#).await;
    assert_eq!(response.status(), 204);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (status, body) = post_text(&format!("{}/xhr", session_url), "").await;
    assert_eq!(status, 200);
    assert_eq!(body, "a[\"m1\"]\n");
}

#[tokio::test]
async fn test_send_errors() {
    let (base_url, _server, _handle) = create_test_server().await;

    // Send never creates a session
    let response = post(&format!("{}/echo/000/unknown/xhr_send", base_url), r#"["x"]"#).await;
    assert_eq!(response.status(), 404);

    let session_url = format!("{}/echo/000/errs", base_url);
    post_text(&format!("{}/xhr", session_url), "").await;

    let (status, body) = post_text(&format!("{}/xhr_send", session_url), "").await;
    assert_eq!(status, 500);
    assert_eq!(body, "Payload expected.");

    let (status, body) = post_text(&format!("{}/xhr_send", session_url), "[\"x\"").await;
    assert_eq!(status, 500);
    assert_eq!(body, "Broken JSON encoding.");

    // The session survives bad payloads
    let response = post(&format!("{}/xhr_send", session_url), r#"["ok"]"#).await;
    assert_eq!(response.status(), 204);
}

#[tokio::test]
async fn test_second_receiver_rejected() {
    let (base_url, _server, _handle) = create_test_server().await;
    let xhr_url = format!("{}/echo/000/busy/xhr", base_url);

    post_text(&xhr_url, "").await;

    let held_url = xhr_url.clone();
    let held = tokio::spawn(async move { post_text(&held_url, "").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (_, body) = post_text(&xhr_url, "").await;
    assert_eq!(body, "c[2010,\"Another connection still open\"]\n");

    // The first poll is unaffected and ends with a heartbeat
    let (_, body) = held.await.unwrap();
    assert_eq!(body, "h\n");
}

#[tokio::test]
async fn test_application_close() {
    let (base_url, server, _handle) = create_test_server().await;
    let xhr_url = format!("{}/close/000/bye/xhr", base_url);

    let (_, body) = post_text(&xhr_url, "").await;
    assert_eq!(body, "o\n");

    let (_, body) = post_text(&xhr_url, "").await;
    assert_eq!(body, "c[3000,\"Go away!\"]\n");

    // A late receiver learns how the session ended
    let (_, body) = post_text(&xhr_url, "").await;
    assert_eq!(body, "c[3000,\"Go away!\"]\n");
    assert!(server.registry().get(&SessionId::parse("bye").unwrap()).is_none());
}

#[tokio::test]
async fn test_streaming_rotates_after_byte_limit() {
    let (base_url, _server, _handle) = create_test_server().await;
    let session_url = format!("{}/streaming_echo/000/stream1", base_url);

    let response = post(&format!("{}/xhr_streaming", session_url), "").await;
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/javascript; charset=UTF-8"
    );

    let long = "x".repeat(100);
    let status = post(
        &format!("{}/xhr_send", session_url),
        &format!("[\"{}\"]", long),
    )
    .await
    .status();
    assert_eq!(status, 204);

    // The response ends on its own once the budget is spent
    let body = tokio::time::timeout(Duration::from_secs(5), response.text())
        .await
        .expect("streaming response did not rotate")
        .unwrap();
    let prelude = format!("{}\n", "h".repeat(2048));
    assert!(body.starts_with(&prelude));
    assert_eq!(
        &body[prelude.len()..],
        format!("o\na[\"{}\"]\n", long)
    );

    // The session outlives the rotated response
    let response = post(&format!("{}/xhr_send", session_url), r#"["again"]"#).await;
    assert_eq!(response.status(), 204);
}

#[tokio::test]
async fn test_eventsource_framing() {
    let (base_url, _server, _handle) = create_test_server().await;

    let mut response = reqwest::get(format!("{}/echo/000/es1/eventsource", base_url))
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream; charset=UTF-8"
    );

    let mut received = String::new();
    while !received.contains("data: o\r\n\r\n") {
        let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
            .await
            .unwrap()
            .unwrap()
            .expect("stream ended early");
        received.push_str(std::str::from_utf8(&chunk).unwrap());
    }
    assert_eq!(received, "\r\ndata: o\r\n\r\n");
}

#[tokio::test]
async fn test_jsonp_transport() {
    let (base_url, _server, _handle) = create_test_server().await;
    let session_url = format!("{}/echo/000/jp1", base_url);

    let response = reqwest::get(format!("{}/jsonp", session_url)).await.unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.unwrap(), "\"callback\" parameter required");

    let response = reqwest::get(format!("{}/jsonp?c=%28alert%29", session_url))
        .await
        .unwrap();
    assert_eq!(response.status(), 500);

    let body = reqwest::get(format!("{}/jsonp?c=cb", session_url))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "/**/cb(\"o\");\r\n");

    let response = reqwest::Client::new()
        .post(format!("{}/jsonp_send", session_url))
        .header("content-type", "application/x-www-form-urlencoded")
        .body("d=%5B%22x%22%5D")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");

    let body = reqwest::get(format!("{}/jsonp?c=cb", session_url))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "/**/cb(\"a[\\\"x\\\"]\");\r\n");
}

#[tokio::test]
async fn test_cors_and_cookie_headers() {
    let (base_url, _server, _handle) = create_test_server().await;

    let response = reqwest::Client::new()
        .request(
            reqwest::Method::OPTIONS,
            format!("{}/echo/000/pre/xhr", base_url),
        )
        .header("origin", "http://example.com")
        .header("access-control-request-headers", "a, b")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    let headers = response.headers();
    assert_eq!(headers.get("access-control-allow-methods").unwrap(), "OPTIONS, POST");
    assert_eq!(headers.get("access-control-allow-origin").unwrap(), "http://example.com");
    assert_eq!(headers.get("access-control-allow-headers").unwrap(), "a, b");
    assert_eq!(headers.get("access-control-max-age").unwrap(), "31536000");

    let response = post(&format!("{}/cookie_needed_echo/000/ck/xhr", base_url), "").await;
    assert_eq!(
        response.headers().get("set-cookie").unwrap(),
        "JSESSIONID=dummy; path=/"
    );

    let response = post(&format!("{}/echo/000/nock/xhr", base_url), "").await;
    assert!(response.headers().get("set-cookie").is_none());
}

#[tokio::test]
async fn test_method_and_path_rules() {
    let (base_url, _server, _handle) = create_test_server().await;

    let response = reqwest::get(format!("{}/echo/000/m1/xhr", base_url)).await.unwrap();
    assert_eq!(response.status(), 405);

    let response = post(&format!("{}/echo/000/m1/websocket", base_url), "").await;
    assert_eq!(response.status(), 405);

    let response = reqwest::get(format!("{}/echo/000/m1/websocket", base_url))
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(
        response.text().await.unwrap(),
        "Can \"Upgrade\" only to \"WebSocket\"."
    );

    let response = post(&format!("{}/echo/000/a.b/xhr", base_url), "").await;
    assert_eq!(response.status(), 404);

    let response = reqwest::get(format!("{}/disabled_websocket_echo/000/d1/websocket", base_url))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_websocket_echo() {
    let (base_url, _server, _handle) = create_test_server().await;
    let ws_url = format!("{}/echo/000/ws1/websocket", base_url.replace("http", "ws"));

    let (mut ws, _) = tokio_tungstenite::connect_async(ws_url).await.unwrap();
    let open = ws.next().await.unwrap().unwrap();
    assert_eq!(open.to_text().unwrap(), "o");

    ws.send(Message::Text(r#"["hello","world"]"#.into())).await.unwrap();
    let mut echoed = Vec::new();
    while echoed.len() < 2 {
        let frame = ws.next().await.unwrap().unwrap();
        let text = frame.to_text().unwrap();
        let batch: Vec<String> = serde_json::from_str(&text[1..]).unwrap();
        assert!(text.starts_with('a'));
        echoed.extend(batch);
    }
    assert_eq!(echoed, vec!["hello".to_string(), "world".to_string()]);

    // Empty frames are ignored; the connection stays up
    ws.send(Message::Text("".into())).await.unwrap();
    ws.send(Message::Text(r#""solo""#.into())).await.unwrap();
    let frame = ws.next().await.unwrap().unwrap();
    assert_eq!(frame.to_text().unwrap(), "a[\"solo\"]");
}

#[tokio::test]
async fn test_websocket_close_frame() {
    let (base_url, _server, _handle) = create_test_server().await;
    let ws_url = format!("{}/close/000/ws2/websocket", base_url.replace("http", "ws"));

    let (mut ws, _) = tokio_tungstenite::connect_async(ws_url).await.unwrap();
    assert_eq!(ws.next().await.unwrap().unwrap().to_text().unwrap(), "o");
    assert_eq!(
        ws.next().await.unwrap().unwrap().to_text().unwrap(),
        "c[3000,\"Go away!\"]"
    );
}

#[tokio::test]
async fn test_raw_websocket_echo() {
    let (base_url, _server, _handle) = create_test_server().await;
    let ws_url = format!("{}/echo/websocket", base_url.replace("http", "ws"));

    let (mut ws, _) = tokio_tungstenite::connect_async(ws_url).await.unwrap();
    ws.send(Message::Text("plain text".into())).await.unwrap();
    let echoed = ws.next().await.unwrap().unwrap();
    assert_eq!(echoed.to_text().unwrap(), "plain text");
}

#[tokio::test]
async fn test_abandoned_session_times_out() {
    let (base_url, server, _handle) = create_test_server().await;
    let xhr_url = format!("{}/short/000/idle/xhr", base_url);

    let started = Instant::now();
    let (_, body) = post_text(&xhr_url, "").await;
    assert_eq!(body, "o\n");
    assert_eq!(server.session_count(), 1);

    while server.session_count() > 0 {
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "session outlived its timeout"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(started.elapsed() >= Duration::from_millis(200));

    // Send to the expired session is refused
    let response = post(&format!("{}/short/000/idle/xhr_send", base_url), r#"["x"]"#).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let (base_url, server, _handle) = create_test_server().await;
    post_text(&format!("{}/echo/000/s1/xhr", base_url), "").await;
    post_text(&format!("{}/echo/000/s2/xhr", base_url), "").await;
    assert_eq!(server.session_count(), 2);

    server.shutdown();
    assert_eq!(server.session_count(), 0);

    let (_, body) = post_text(&format!("{}/echo/000/s1/xhr", base_url), "").await;
    assert_eq!(body, "c[3000,\"Go away!\"]\n");
}
