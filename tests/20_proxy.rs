mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tower::ServiceExt;

use common::{
    body_json, read_head, serve_app, spawn_slow_upstream, spawn_upgrade_upstream,
    spawn_upstream, test_app,
};

fn req(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn strips_tenant_segment_and_keeps_query() {
    let upstream = spawn_upstream().await;
    let app = test_app(&["acme"], &upstream);

    let response = app
        .oneshot(req("/acme/dashboard/d/1?orgId=2&refresh=5s"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["path"], "/dashboard/d/1");
    assert_eq!(body["query"], "orgId=2&refresh=5s");
    assert_eq!(body["tenant_header"], "acme");
}

#[tokio::test]
async fn forwards_inbound_cookies_verbatim() {
    let upstream = spawn_upstream().await;
    let app = test_app(&["acme"], &upstream);

    let request = Request::builder()
        .uri("/acme/dashboard/d/1")
        .header("cookie", "grafana_session=abc123; theme=dark")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["cookie"], "grafana_session=abc123; theme=dark");
}

#[tokio::test]
async fn relays_every_set_cookie_header() {
    let upstream = spawn_upstream().await;
    let app = test_app(&["acme"], &upstream);

    let response = app.oneshot(req("/acme/dashboard/cookies")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookies: Vec<&str> = response
        .headers()
        .get_all("set-cookie")
        .iter()
        .map(|v| v.to_str().unwrap())
        .collect();
    assert_eq!(cookies.len(), 2);
    assert!(cookies[0].contains("grafana_session=abc123"));
    // Attributes are relayed untouched
    assert!(cookies[0].contains("Path=/; HttpOnly"));
    assert!(cookies[1].contains("grafana_session_expiry"));
}

#[tokio::test]
async fn fallback_route_forwards_anonymously() {
    let upstream = spawn_upstream().await;
    let app = test_app(&["acme"], &upstream);

    let response = app.oneshot(req("/dashboard/d/1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["path"], "/dashboard/d/1");
    assert_eq!(body["tenant_header"], Value::Null);
}

#[tokio::test]
async fn fallback_route_uses_header_tenant_when_present() {
    let upstream = spawn_upstream().await;
    let app = test_app(&["acme"], &upstream);

    let request = Request::builder()
        .uri("/dashboard/d/1")
        .header("x-tenant-id", "acme")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["path"], "/dashboard/d/1");
    assert_eq!(body["tenant_header"], "acme");
}

#[tokio::test]
async fn tenant_scoped_dashboard_requires_known_tenant() {
    let upstream = spawn_upstream().await;
    let app = test_app(&["acme"], &upstream);

    let response = app.oneshot(req("/globex/dashboard/d/1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "UNKNOWN_TENANT");
}

#[tokio::test]
async fn websocket_upgrade_splices_bytes_both_ways() {
    let upstream = spawn_upgrade_upstream().await;
    let gateway = serve_app(test_app(&["acme"], &upstream)).await;

    let mut client = TcpStream::connect(gateway).await.unwrap();
    client
        .write_all(
            b"GET /acme/dashboard/api/live/ws HTTP/1.1\r\n\
              Host: gateway\r\n\
              Connection: Upgrade\r\n\
              Upgrade: websocket\r\n\
              Sec-WebSocket-Version: 13\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        )
        .await
        .unwrap();

    let head = read_head(&mut client).await;
    assert!(
        head.starts_with(b"HTTP/1.1 101"),
        "expected 101, got: {}",
        String::from_utf8_lossy(&head)
    );

    // The upstream echoes raw bytes, so a round-trip proves the splice
    // carries traffic in both directions.
    client.write_all(b"ping-1").await.unwrap();
    let mut echoed = [0u8; 6];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"ping-1");
}

#[tokio::test]
async fn declined_upgrade_relays_the_upstream_answer() {
    // This upstream never switches protocols; its plain response must come
    // back unchanged.
    let upstream = spawn_upstream().await;
    let app = test_app(&["acme"], &upstream);

    let request = Request::builder()
        .uri("/acme/dashboard/d/1")
        .header("connection", "Upgrade")
        .header("upgrade", "websocket")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["path"], "/dashboard/d/1");
}

#[tokio::test]
async fn slow_body_streams_past_the_connect_timeout() {
    // The test client's connect timeout is 1s; the body pauses for longer.
    // Only the connect phase is bounded, so the full body still arrives.
    let upstream = spawn_slow_upstream(Duration::from_millis(1500)).await;
    let app = test_app(&["acme"], &upstream);

    let response = app.oneshot(req("/acme/dashboard/d/1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"helloworld");
}

#[tokio::test]
async fn unreachable_upstream_becomes_502() {
    // A freshly-picked unused port refuses connections
    let port = portpicker::pick_unused_port().unwrap();
    let app = test_app(&["acme"], &format!("http://127.0.0.1:{}", port));

    let response = app.oneshot(req("/acme/dashboard/d/1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let body = body_json(response).await;
    assert_eq!(body["error"], "Grafana service unavailable");
    assert_eq!(body["code"], "UPSTREAM_UNAVAILABLE");
}
