//! Cross-module properties: framing, envelope invariants, validation.

use conduit_mcp_core::protocol::framing::{FrameCodec, Framing, DEFAULT_MAX_MESSAGE_SIZE};
use conduit_mcp_core::protocol::jsonrpc::{
    validate_message, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, MessageKind, RequestId,
};
use conduit_mcp_core::schema::validate_arguments;
use conduit_mcp_core::utils::{encode_cursor, paginate};
use serde_json::json;

fn message_mix() -> Vec<JsonRpcMessage> {
    vec![
        JsonRpcMessage::Request(JsonRpcRequest::new(
            "initialize",
            Some(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "c", "version": "1"}
            })),
            RequestId::number(1),
        )),
        JsonRpcMessage::notification("notifications/initialized", None),
        JsonRpcMessage::Request(JsonRpcRequest::new(
            "tools/call",
            Some(json!({"name": "add", "arguments": {"a": 2, "b": 3}})),
            RequestId::string("call-1"),
        )),
        JsonRpcMessage::Response(JsonRpcResponse::success(
            json!({"content": [{"type": "text", "text": "5"}], "isError": false}),
            Some(RequestId::string("call-1")),
        )),
    ]
}

#[test]
fn any_chunking_of_a_frame_stream_decodes_identically() {
    for framing in [Framing::NewlineDelimited, Framing::ContentLength] {
        let encoder = FrameCodec::new(framing, DEFAULT_MAX_MESSAGE_SIZE);
        let messages = message_mix();
        let mut stream = Vec::new();
        for message in &messages {
            stream.extend_from_slice(&encoder.encode_message(message).unwrap());
        }

        for chunk_size in 1..=stream.len() {
            let mut codec = FrameCodec::new(framing, DEFAULT_MAX_MESSAGE_SIZE);
            let mut decoded = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                decoded.extend(codec.feed(chunk).unwrap());
            }
            assert_eq!(decoded, messages, "chunk size {chunk_size}");
        }
    }
}

#[test]
fn decoded_messages_satisfy_envelope_invariants() {
    for message in message_mix() {
        assert!(validate_message(&message).is_ok());
        assert_ne!(message.kind(), MessageKind::Invalid);
    }
}

#[test]
fn validator_failure_maps_cleanly_into_error_data() {
    let schema = json!({
        "type": "object",
        "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
        "required": ["a", "b"]
    });
    let issues = validate_arguments(&json!({"a": 1}), &schema).unwrap_err();
    let data = serde_json::to_value(&issues).unwrap();
    assert_eq!(data[0]["pointer"], json!("/b"));
    assert!(data[0]["message"].is_string());
}

#[test]
fn pagination_cursors_are_opaque_but_stable() {
    let items: Vec<u32> = (0..120).collect();
    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let (page, next) = paginate(&items, cursor.as_deref(), 50).unwrap();
        seen.extend(page);
        match next {
            Some(next) => {
                // Cursors are not raw offsets on the wire.
                assert!(next.parse::<usize>().is_err());
                cursor = Some(next);
            }
            None => break,
        }
    }
    assert_eq!(seen, items);
    assert_eq!(encode_cursor(50), encode_cursor(50));
}
