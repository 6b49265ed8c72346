//! Round-trip fidelity of the translation layer across the accepted reply
//! shapes.

use agentbench::agentbench::translation::{
    harness_to_wire, wire_to_harness, HarnessMessage, ToolCall, ToolOutput, ToolSpec,
};
use agentbench::agentbench::wire::{parse_rpc_reply, MessageRole};
use serde_json::{json, Value as JsonValue};

fn transcript() -> Vec<HarnessMessage> {
    vec![
        HarnessMessage::system("Follow the retail policy."),
        HarnessMessage::user("I want to return my order"),
        HarnessMessage::Assistant {
            content: Some("Sure, which order?".to_string()),
            tool_calls: None,
        },
        HarnessMessage::user("Order O-17"),
        HarnessMessage::Assistant {
            content: None,
            tool_calls: Some(vec![ToolCall::new("get_order", {
                let mut args = serde_json::Map::new();
                args.insert("order_id".to_string(), serde_json::json!("O-17"));
                args
            })]),
        },
        HarnessMessage::Tool(ToolOutput {
            tool_call_id: "c-1".to_string(),
            tool_name: "get_order".to_string(),
            content: "{\"status\": \"delivered\"}".to_string(),
        }),
    ]
}

fn tools() -> Vec<ToolSpec> {
    vec![ToolSpec {
        name: "get_order".to_string(),
        description: "Look up an order by id.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {"order_id": {"type": "string"}},
            "required": ["order_id"]
        }),
    }]
}

fn envelope(result: JsonValue) -> JsonValue {
    json!({"jsonrpc": "2.0", "id": "req-1", "result": result})
}

#[test]
fn test_outgoing_message_preserves_role_ordering() {
    let wire = harness_to_wire(&transcript(), &tools(), Some("ctx-5"));
    assert_eq!(wire.role, MessageRole::User);
    assert_eq!(wire.context_id.as_deref(), Some("ctx-5"));

    let text = wire.text_content();
    let indexes: Vec<usize> = [
        "<system>",
        "<available_tools>",
        "- get_order(order_id: string)",
        "User: I want to return my order",
        "Assistant: Sure, which order?",
        "User: Order O-17",
        "Tool Result (get_order): {\"status\": \"delivered\"}",
    ]
    .iter()
    .map(|needle| text.find(needle).unwrap_or_else(|| panic!("missing {}", needle)))
    .collect();

    let mut sorted = indexes.clone();
    sorted.sort_unstable();
    assert_eq!(indexes, sorted, "sections out of order in:\n{}", text);
}

#[test]
fn test_round_trip_tool_call_through_parts_shapes() {
    let tool_call = json!({"tool_call": {
        "name": "get_order",
        "arguments": {"order_id": "O-17"}
    }});

    let shapes: Vec<JsonValue> = vec![
        // full message
        json!({
            "messageId": "m-1",
            "role": "agent",
            "parts": [{"data": tool_call}],
            "contextId": "ctx-5"
        }),
        // bare parts
        json!({"parts": [{"data": tool_call}]}),
        // wrapped
        json!({"message": {"parts": [{"data": tool_call}], "contextId": "ctx-5"}}),
        // task object
        json!({
            "contextId": "ctx-5",
            "status": {"state": "completed",
                       "message": {"role": "agent", "parts": [{"data": tool_call}]}}
        }),
    ];

    for shape in shapes {
        let reply = parse_rpc_reply(&envelope(shape.clone()))
            .unwrap_or_else(|e| panic!("shape {} rejected: {}", shape, e));
        let translated = wire_to_harness(&reply);
        match translated.assistant {
            HarnessMessage::Assistant {
                content,
                tool_calls: Some(calls),
            } => {
                assert!(content.is_none());
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "get_order");
                assert_eq!(calls[0].arguments["order_id"], "O-17");
            }
            other => panic!("shape {} produced {:?}", shape, other),
        }
    }
}

#[test]
fn test_round_trip_tool_call_through_string_shape() {
    // Shape 3 carries no parts, so the call arrives embedded in text.
    let reply = parse_rpc_reply(&envelope(json!(
        "{\"tool_call\": {\"name\": \"get_order\", \"arguments\": {\"order_id\": \"O-17\"}}}"
    )))
    .unwrap();
    let translated = wire_to_harness(&reply);
    match translated.assistant {
        HarnessMessage::Assistant {
            content,
            tool_calls: Some(calls),
        } => {
            assert!(content.is_none());
            assert_eq!(calls[0].name, "get_order");
            assert_eq!(calls[0].arguments["order_id"], "O-17");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_round_trip_text_reply_preserves_content() {
    for shape in [
        json!({"parts": [{"text": "Your order O-17 was delivered."}]}),
        json!("Your order O-17 was delivered."),
        json!({"message": {"parts": [{"text": "Your order O-17 was delivered."}]}}),
    ] {
        let reply = parse_rpc_reply(&envelope(shape)).unwrap();
        let translated = wire_to_harness(&reply);
        match translated.assistant {
            HarnessMessage::Assistant {
                content,
                tool_calls,
            } => {
                assert_eq!(content.as_deref(), Some("Your order O-17 was delivered."));
                assert!(tool_calls.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

#[test]
fn test_no_assistant_ever_carries_both_text_and_calls() {
    // A deliberately conflicting reply: prose plus an embedded call plus a
    // structured call.
    let reply = parse_rpc_reply(&envelope(json!({
        "parts": [
            {"text": "Let me look. {\"tool_call\": {\"name\": \"embedded\", \"arguments\": {}}}"},
            {"data": {"tool_call": {"name": "structured", "arguments": {}}}}
        ]
    })))
    .unwrap();
    let translated = wire_to_harness(&reply);
    match translated.assistant {
        HarnessMessage::Assistant {
            content,
            tool_calls,
        } => {
            let calls = tool_calls.expect("tool calls kept");
            assert!(content.is_none(), "invariant violated");
            // Structured extraction wins; the text was never scanned.
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].name, "structured");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_context_id_surfaces_from_every_shape_that_has_one() {
    for shape in [
        json!({"parts": [{"text": "x"}], "contextId": "ctx-a"}),
        json!({"message": {"parts": [{"text": "x"}], "contextId": "ctx-a"}}),
        json!({"contextId": "ctx-a",
               "status": {"message": {"parts": [{"text": "x"}]}}}),
    ] {
        let reply = parse_rpc_reply(&envelope(shape)).unwrap();
        assert_eq!(wire_to_harness(&reply).context_id.as_deref(), Some("ctx-a"));
    }
}
