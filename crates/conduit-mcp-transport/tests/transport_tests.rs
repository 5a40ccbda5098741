//! Transport behavior end to end: stdio over in-memory pipes with both
//! framings, and the HTTP router driven as a tower service.

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use conduit_mcp_core::protocol::framing::{FrameCodec, Framing, DEFAULT_MAX_MESSAGE_SIZE};
use conduit_mcp_core::protocol::jsonrpc::{
    JsonRpcMessage, JsonRpcRequest, JsonRpcResponse,
};
use conduit_mcp_core::protocol::ServerCapabilities;
use conduit_mcp_core::types::ServerInfo;
use conduit_mcp_transport::events::{NotificationEnvelope, SubscriberHub, SubscriberStream};
use conduit_mcp_transport::http::{HttpServerIdentity, HttpTransport, HttpTransportConfig};
use conduit_mcp_transport::stdio::{StdioTransport, StdioTransportConfig};
use conduit_mcp_transport::{
    ConnectionState, MessageHandler, Transport, TransportContext,
};
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use tower::ServiceExt;

struct EchoHandler;

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn on_message(
        &self,
        message: JsonRpcMessage,
        _ctx: TransportContext,
    ) -> Option<JsonRpcMessage> {
        match message {
            JsonRpcMessage::Request(req) if req.id.is_some() => {
                Some(JsonRpcMessage::Response(JsonRpcResponse::success(
                    json!({"method": req.method}),
                    req.id,
                )))
            }
            _ => None,
        }
    }
}

struct EmptyHub;

#[async_trait]
impl SubscriberHub for EmptyHub {
    async fn open(
        &self,
        _client_id: String,
        _types: Vec<String>,
        _filter: HashMap<String, Value>,
    ) -> SubscriberStream {
        SubscriberStream {
            subscription_id: "sub-empty".to_string(),
            stream: futures::stream::pending::<NotificationEnvelope>().boxed(),
        }
    }

    async fn close(&self, _subscription_id: &str) {}
}

#[tokio::test]
async fn stdio_round_trips_with_content_length_framing() {
    let (client, server) = duplex(8192);
    let (server_read, server_write) = tokio::io::split(server);
    let (mut client_read, mut client_write) = tokio::io::split(client);

    let mut transport = StdioTransport::new(StdioTransportConfig {
        framing: Framing::ContentLength,
        ..Default::default()
    });
    transport
        .start_with_streams(Arc::new(EchoHandler), server_read, server_write)
        .await
        .unwrap();
    assert_eq!(transport.state(), ConnectionState::Connected);

    // Two coalesced frames in one write: both must come back, in order.
    let codec = FrameCodec::new(Framing::ContentLength, DEFAULT_MAX_MESSAGE_SIZE);
    let mut outgoing = Vec::new();
    for (id, method) in [(1i64, "tools/list"), (2, "prompts/list")] {
        let frame = codec
            .encode_message(&JsonRpcMessage::Request(JsonRpcRequest::new(
                method,
                None,
                id.into(),
            )))
            .unwrap();
        outgoing.extend_from_slice(&frame);
    }
    client_write.write_all(&outgoing).await.unwrap();

    let mut decoder = FrameCodec::new(Framing::ContentLength, DEFAULT_MAX_MESSAGE_SIZE);
    let mut responses = Vec::new();
    let mut buffer = [0u8; 1024];
    while responses.len() < 2 {
        let n = client_read.read(&mut buffer).await.unwrap();
        assert!(n > 0, "peer closed early");
        responses.extend(decoder.feed(&buffer[..n]).unwrap());
    }

    let ids: Vec<String> = responses
        .iter()
        .map(|message| message.id().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["1", "2"]);
    match &responses[0] {
        JsonRpcMessage::Response(response) => {
            assert_eq!(response.result.as_ref().unwrap()["method"], json!("tools/list"));
        }
        other => panic!("expected response, got {other:?}"),
    }

    transport.stop().await.unwrap();
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    let stats = transport.stats();
    assert_eq!(stats.messages_received, 2);
    assert_eq!(stats.messages_sent, 2);
}

#[tokio::test]
async fn stdio_eof_disconnects() {
    let (client, server) = duplex(1024);
    let (server_read, server_write) = tokio::io::split(server);
    let (_client_read, client_write) = tokio::io::split(client);

    let mut transport = StdioTransport::new(StdioTransportConfig::default());
    transport
        .start_with_streams(Arc::new(EchoHandler), server_read, server_write)
        .await
        .unwrap();

    drop(client_write);
    drop(_client_read);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    transport.stop().await.unwrap();
}

fn http_transport() -> HttpTransport {
    HttpTransport::new(
        HttpTransportConfig {
            port: 0,
            ..Default::default()
        },
        HttpServerIdentity {
            info: ServerInfo::new("http-test-server", "0.9.0"),
            protocol_version: conduit_mcp_core::protocol::PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::full(),
        },
        Arc::new(EmptyHub),
    )
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn post_rpc_returns_envelope_with_200() {
    let transport = http_transport();
    let router = transport.router(Arc::new(EchoHandler));

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_vec(&JsonRpcRequest::new("ping", None, 7.into())).unwrap(),
        ))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("mcp-session-id"));

    let body = body_json(response).await;
    assert_eq!(body["jsonrpc"], json!("2.0"));
    assert_eq!(body["id"], json!(7));
    assert_eq!(body["result"]["method"], json!("ping"));
}

#[tokio::test]
async fn post_notification_returns_202() {
    let transport = http_transport();
    let router = transport.router(Arc::new(EchoHandler));

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_vec(&JsonRpcRequest::notification(
                "notifications/initialized",
                None,
            ))
            .unwrap(),
        ))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn non_json_body_is_400_with_parse_error() {
    let transport = http_transport();
    let router = transport.router(Arc::new(EchoHandler));

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .body(Body::from("this is not json"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!(-32700));
}

#[tokio::test]
async fn json_but_invalid_envelope_is_200_with_32600() {
    let transport = http_transport();
    let router = transport.router(Arc::new(EchoHandler));

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"hello": "world", "id": 3}"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!(-32600));
    assert_eq!(body["id"], json!(3));
}

#[tokio::test]
async fn info_reports_identity_and_endpoints() {
    let transport = http_transport();
    let router = transport.router(Arc::new(EchoHandler));

    let request = Request::builder()
        .method("GET")
        .uri("/info")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["server"]["name"], json!("http-test-server"));
    assert_eq!(body["protocol"]["transport"], json!("http"));
    assert_eq!(body["capabilities"]["tools"]["listChanged"], json!(true));
    assert_eq!(body["endpoints"]["events"], json!("/events"));
}

#[tokio::test]
async fn health_reflects_listener_state() {
    // Before start the listener is down: 503.
    let transport = http_transport();
    let router = transport.router(Arc::new(EchoHandler));
    let response = router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["status"], json!("unhealthy"));

    // After binding, the same shared state reports healthy.
    let mut transport = http_transport();
    transport.start(Arc::new(EchoHandler)).await.unwrap();
    assert!(transport.local_addr().is_some());
    let router = transport.router(Arc::new(EchoHandler));
    let response = router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], json!("healthy"));
    transport.stop().await.unwrap();
}
