//! Engine behavior: lifecycle gating, failure discipline, pagination,
//! logging levels, and the async job queue.

use conduit_mcp_core::error::{McpError, ToolError};
use conduit_mcp_core::protocol::jsonrpc::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
use conduit_mcp_core::protocol::{ServerCapabilities, SessionState};
use conduit_mcp_core::types::notifications::LogLevel;
use conduit_mcp_core::types::prompts::{GetPromptResponse, Prompt, PromptArgument, PromptMessage};
use conduit_mcp_core::types::resources::{ReadResourceResponse, Resource, ResourceContents};
use conduit_mcp_core::types::tools::{Tool, ToolCallResponse};
use conduit_mcp_core::types::ServerInfo;
use conduit_mcp_server::{
    JobStatus, McpServer, PromptDescriptor, PromptFn, RequestContext, ResourceDescriptor,
    ResourceFn, ToolDescriptor, ToolFn,
};
use conduit_mcp_transport::{MessageHandler, TransportContext, TransportKind};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn test_server() -> McpServer {
    McpServer::new(
        ServerInfo::new("behavior-server", "0.1.0"),
        ServerCapabilities::full(),
    )
}

fn ctx() -> TransportContext {
    TransportContext::new("test-peer", TransportKind::Stdio)
}

async fn rpc(server: &McpServer, method: &str, params: Option<Value>, id: i64) -> JsonRpcResponse {
    let handler = server.message_handler();
    let message = JsonRpcMessage::Request(JsonRpcRequest::new(method, params, id.into()));
    match handler.on_message(message, ctx()).await {
        Some(JsonRpcMessage::Response(response)) => response,
        other => panic!("expected a response, got {other:?}"),
    }
}

async fn initialize(server: &McpServer) {
    let response = rpc(
        server,
        "initialize",
        Some(json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": {"name": "t", "version": "1"}
        })),
        1,
    )
    .await;
    assert!(response.is_success());
    let handler = server.message_handler();
    handler
        .on_message(
            JsonRpcMessage::notification("notifications/initialized", None),
            ctx(),
        )
        .await;
    assert_eq!(server.session_state().await, SessionState::Initialized);
}

#[tokio::test]
async fn lifecycle_gate_rejects_methods_before_initialize() {
    let server = test_server();
    for method in ["tools/list", "resources/list", "prompts/list", "tools/call"] {
        let response = rpc(&server, method, None, 1).await;
        assert_eq!(
            response.error.as_ref().unwrap().code,
            -32002,
            "method {method} must be gated"
        );
    }
    // ping is exempt in every state.
    let response = rpc(&server, "ping", None, 2).await;
    assert_eq!(response.result, Some(json!({})));
}

#[tokio::test]
async fn initialize_twice_is_invalid() {
    let server = test_server();
    initialize(&server).await;
    let response = rpc(
        &server,
        "initialize",
        Some(json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": {"name": "t", "version": "1"}
        })),
        9,
    )
    .await;
    assert_eq!(response.error.unwrap().code, -32600);
}

#[tokio::test]
async fn unsupported_protocol_version_is_rejected() {
    let server = test_server();
    let response = rpc(
        &server,
        "initialize",
        Some(json!({
            "protocolVersion": "1999-01-01",
            "capabilities": {},
            "clientInfo": {"name": "t", "version": "1"}
        })),
        1,
    )
    .await;
    assert_eq!(response.error.unwrap().code, -32602);
    // The failed handshake leaves the session uninitialized.
    assert_eq!(server.session_state().await, SessionState::Uninitialized);
}

#[tokio::test]
async fn invalid_envelope_yields_32600_with_null_id() {
    let server = test_server();
    let handler = server.message_handler();
    let raw: JsonRpcMessage =
        serde_json::from_value(json!({"jsonrpc": "1.0", "method": "ping", "id": 1})).unwrap();
    let reply = handler.on_message(raw, ctx()).await;
    let Some(JsonRpcMessage::Response(response)) = reply else {
        panic!("expected error response");
    };
    assert_eq!(response.error.unwrap().code, -32600);
    assert_eq!(response.id, None);
}

#[tokio::test]
async fn handler_failure_becomes_is_error_envelope_not_rpc_error() {
    let server = test_server();
    server
        .registry()
        .register_tool(ToolDescriptor::new(
            Tool::new("fragile", "Always fails", json!({"type": "object"})),
            Arc::new(ToolFn(|_args: Value, _ctx: RequestContext| async move {
                Err::<ToolCallResponse, _>(McpError::Tool(ToolError::ExecutionFailed(
                    "disk on fire".to_string(),
                )))
            })),
        ))
        .await
        .unwrap();
    initialize(&server).await;

    let response = rpc(
        &server,
        "tools/call",
        Some(json!({"name": "fragile", "arguments": {}})),
        3,
    )
    .await;
    // The session survives and the failure is a result, not an error.
    assert!(response.error.is_none());
    let result = response.result.unwrap();
    assert_eq!(result["isError"], json!(true));
    assert!(result["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("disk on fire"));

    let response = rpc(&server, "ping", None, 4).await;
    assert!(response.is_success());
}

#[tokio::test]
async fn unknown_tool_and_unknown_resource() {
    let server = test_server();
    initialize(&server).await;

    let response = rpc(
        &server,
        "tools/call",
        Some(json!({"name": "ghost", "arguments": {}})),
        5,
    )
    .await;
    assert_eq!(response.error.unwrap().code, -32602);

    let response = rpc(
        &server,
        "resources/read",
        Some(json!({"uri": "file:///missing"})),
        6,
    )
    .await;
    assert_eq!(response.error.unwrap().code, -32001);
}

#[tokio::test]
async fn subscribe_to_non_subscribable_resource_is_denied() {
    let server = test_server();
    server
        .registry()
        .register_resource(ResourceDescriptor::new(
            Resource::new("file:///plain", "plain"),
            Arc::new(ResourceFn(|uri: String, _ctx: RequestContext| async move {
                Ok(ReadResourceResponse {
                    contents: vec![ResourceContents::text(uri, "static")],
                })
            })),
        ))
        .await
        .unwrap();
    initialize(&server).await;

    let response = rpc(
        &server,
        "resources/subscribe",
        Some(json!({"uri": "file:///plain"})),
        7,
    )
    .await;
    assert_eq!(response.error.unwrap().code, -32003);
}

#[tokio::test]
async fn tools_list_paginates_with_opaque_cursors() {
    let server = test_server();
    for index in 0..55 {
        server
            .registry()
            .register_tool(ToolDescriptor::new(
                Tool::new(
                    format!("tool-{index:02}"),
                    "numbered",
                    json!({"type": "object"}),
                ),
                Arc::new(ToolFn(|_args: Value, _ctx: RequestContext| async move {
                    Ok(ToolCallResponse::text("ok"))
                })),
            ))
            .await
            .unwrap();
    }
    initialize(&server).await;

    let response = rpc(&server, "tools/list", None, 8).await;
    let result = response.result.unwrap();
    let first_page = result["tools"].as_array().unwrap();
    assert_eq!(first_page.len(), 50);
    assert_eq!(first_page[0]["name"], json!("tool-00"));
    let cursor = result["nextCursor"].as_str().expect("cursor").to_string();

    let response = rpc(&server, "tools/list", Some(json!({"cursor": cursor})), 9).await;
    let result = response.result.unwrap();
    let second_page = result["tools"].as_array().unwrap();
    assert_eq!(second_page.len(), 5);
    assert_eq!(second_page[0]["name"], json!("tool-50"));
    assert!(result["nextCursor"].is_null());

    let response = rpc(
        &server,
        "tools/list",
        Some(json!({"cursor": "garbage!!"})),
        10,
    )
    .await;
    assert_eq!(response.error.unwrap().code, -32602);
}

#[tokio::test]
async fn prompt_arguments_validate_and_fill_defaults() {
    let server = test_server();
    server
        .registry()
        .register_prompt(PromptDescriptor::new(
            Prompt::new("greet")
                .with_description("Greets someone")
                .with_argument(PromptArgument::new("who").required())
                .with_argument(
                    PromptArgument::new("salutation")
                        .with_schema(json!({"type": "string", "default": "Hello"})),
                ),
            Arc::new(PromptFn(|args: Value, _ctx: RequestContext| async move {
                let who = args["who"].as_str().unwrap_or("world");
                let salutation = args["salutation"].as_str().unwrap_or("Hi");
                Ok(GetPromptResponse {
                    description: Some(format!("{salutation}, {who}")),
                    messages: vec![PromptMessage::user(format!("{salutation}, {who}!"))],
                })
            })),
        ))
        .await
        .unwrap();
    initialize(&server).await;

    // Default fills in.
    let response = rpc(
        &server,
        "prompts/get",
        Some(json!({"name": "greet", "arguments": {"who": "Ada"}})),
        11,
    )
    .await;
    let result = response.result.unwrap();
    assert_eq!(result["description"], json!("Hello, Ada"));
    assert_eq!(result["messages"][0]["role"], json!("user"));

    // Missing required argument points at /who.
    let response = rpc(
        &server,
        "prompts/get",
        Some(json!({"name": "greet", "arguments": {}})),
        12,
    )
    .await;
    let error = response.error.unwrap();
    assert_eq!(error.code, -32602);
    let pointers: Vec<String> = error.data.unwrap()["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|issue| issue["pointer"].as_str().unwrap().to_string())
        .collect();
    assert!(pointers.contains(&"/who".to_string()));
}

#[tokio::test]
async fn log_level_gates_published_messages() {
    let server = test_server();
    initialize(&server).await;

    // Default minimum is info.
    assert!(server
        .log_message(LogLevel::Debug, Some("test"), json!("quiet"))
        .await
        .is_none());
    assert!(server
        .log_message(LogLevel::Error, Some("test"), json!("loud"))
        .await
        .is_some());

    let response = rpc(
        &server,
        "logging/setLevel",
        Some(json!({"level": "error"})),
        13,
    )
    .await;
    assert_eq!(response.result, Some(json!({})));

    assert!(server
        .log_message(LogLevel::Warning, Some("test"), json!("quiet now"))
        .await
        .is_none());
    assert!(server
        .log_message(LogLevel::Critical, Some("test"), json!("still loud"))
        .await
        .is_some());
}

#[tokio::test]
async fn job_queue_runs_methods_out_of_band() {
    let server = test_server();
    initialize(&server).await;

    let response = rpc(
        &server,
        "jobs/submit",
        Some(json!({"method": "ping"})),
        14,
    )
    .await;
    let result = response.result.unwrap();
    let job_id = result["id"].as_str().unwrap().to_string();
    assert_eq!(result["status"], json!("queued"));

    // Poll until the worker completes it.
    let record = poll_until_terminal(&server, &job_id).await;
    assert_eq!(record["status"], json!("completed"));
    assert_eq!(record["result"], json!({}));

    let response = rpc(
        &server,
        "jobs/result",
        Some(json!({"id": job_id})),
        15,
    )
    .await;
    assert_eq!(response.result.unwrap()["status"], json!("completed"));
}

#[tokio::test]
async fn job_submit_for_unknown_method_is_rejected() {
    let server = test_server();
    initialize(&server).await;
    let response = rpc(
        &server,
        "jobs/submit",
        Some(json!({"method": "no/such/method"})),
        16,
    )
    .await;
    assert_eq!(response.error.unwrap().code, -32602);
}

#[tokio::test]
async fn cancelling_unknown_job_reports_false() {
    let server = test_server();
    initialize(&server).await;
    let response = rpc(
        &server,
        "jobs/cancel",
        Some(json!({"id": "job-nonexistent"})),
        17,
    )
    .await;
    assert_eq!(response.result.unwrap()["cancelled"], json!(false));
}

#[tokio::test]
async fn direct_queue_api_tracks_status_transitions() {
    let server = test_server();
    initialize(&server).await;

    let id = server
        .jobs()
        .enqueue("ping", None, "test-peer")
        .await
        .unwrap();
    let mut status = server.jobs().status(&id).await.unwrap().status;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !status.is_terminal() {
        assert!(tokio::time::Instant::now() < deadline, "job never finished");
        tokio::time::sleep(Duration::from_millis(10)).await;
        status = server.jobs().status(&id).await.unwrap().status;
    }
    assert_eq!(status, JobStatus::Completed);
}

async fn poll_until_terminal(server: &McpServer, job_id: &str) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} never finished"
        );
        let response = rpc(server, "jobs/status", Some(json!({"id": job_id})), 99).await;
        let record = response.result.unwrap();
        let status = record["status"].as_str().unwrap();
        if status == "completed" || status == "failed" {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
