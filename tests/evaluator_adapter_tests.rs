//! Evaluator adapter tests: context persistence, per-task isolation, and
//! the dual-mode scheduler bridge, all against a stub agent server.

use agentbench::agentbench::metrics::MetricsRecorder;
use agentbench::agentbench::protocol_client::ClientConfig;
use agentbench::agentbench::translation::{HarnessMessage, ToolOutput};
use agentbench::agentbench::evaluator_adapter::{ConversationalAgent, RemoteAgentAdapter};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value as JsonValue};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// Stub agent: issues `ctx-N` for each new conversation, echoes a numbered
/// reply, and records every `contextId` it was sent.
#[derive(Default)]
struct AgentState {
    conversations: AtomicUsize,
    replies: AtomicUsize,
    seen_contexts: Mutex<Vec<Option<String>>>,
}

async fn send_handler(
    State(state): State<Arc<AgentState>>,
    Json(envelope): Json<JsonValue>,
) -> Json<JsonValue> {
    let incoming = envelope["params"]["message"]["contextId"]
        .as_str()
        .map(|s| s.to_string());
    state.seen_contexts.lock().unwrap().push(incoming.clone());

    let context = incoming.unwrap_or_else(|| {
        format!("ctx-{}", state.conversations.fetch_add(1, Ordering::SeqCst) + 1)
    });
    let n = state.replies.fetch_add(1, Ordering::SeqCst) + 1;

    Json(json!({
        "jsonrpc": "2.0",
        "id": envelope["id"],
        "result": {
            "messageId": format!("m-{}", n),
            "role": "agent",
            "parts": [{"text": format!("reply {}", n)}],
            "contextId": context
        }
    }))
}

fn card_json() -> JsonValue {
    json!({
        "name": "stub_agent",
        "url": "http://stub",
        "version": "0.0.1",
        "capabilities": {"streaming": false, "pushNotifications": false}
    })
}

async fn spawn_agent(state: Arc<AgentState>) -> SocketAddr {
    let app = Router::new()
        .route(
            "/.well-known/agent-card.json",
            get(|| async { Json(card_json()) }),
        )
        .route("/", post(send_handler))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    addr
}

fn adapter_for(addr: SocketAddr) -> RemoteAgentAdapter {
    RemoteAgentAdapter::new(
        ClientConfig::new(format!("http://{}", addr)).unwrap(),
        "Always be polite.",
        vec![],
        Arc::new(MetricsRecorder::new()),
    )
}

fn assistant_text(message: &HarnessMessage) -> &str {
    match message {
        HarnessMessage::Assistant {
            content: Some(content),
            ..
        } => content,
        other => panic!("expected assistant text, got {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Standalone (no runtime on the calling thread)
// ---------------------------------------------------------------------------

#[test]
fn test_turns_from_plain_thread() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let state = Arc::new(AgentState::default());
    let addr = rt.block_on(spawn_agent(state.clone()));

    let adapter = adapter_for(addr);
    let session = adapter.initial_state(None);

    // No runtime is active here: the bridge builds a throwaway one.
    let (reply, session) = adapter
        .generate_next_message(HarnessMessage::user("Hello"), session)
        .unwrap();
    assert_eq!(assistant_text(&reply), "reply 1");
    assert_eq!(session.context_id.as_deref(), Some("ctx-1"));
    assert_eq!(session.request_count, 1);
    assert_eq!(session.card.as_ref().unwrap().name, "stub_agent");

    let (reply, session) = adapter
        .generate_next_message(HarnessMessage::user("And again"), session)
        .unwrap();
    assert_eq!(assistant_text(&reply), "reply 2");
    assert_eq!(session.request_count, 2);

    // contextId from reply 1 was echoed on call 2.
    let seen = state.seen_contexts.lock().unwrap().clone();
    assert_eq!(seen, vec![None, Some("ctx-1".to_string())]);

    drop(rt);
}

#[test]
fn test_context_persists_across_three_turns() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let state = Arc::new(AgentState::default());
    let addr = rt.block_on(spawn_agent(state.clone()));

    let adapter = adapter_for(addr);
    let mut session = adapter.initial_state(None);
    for turn in ["one", "two", "three"] {
        let (_, next) = adapter
            .generate_next_message(HarnessMessage::user(turn), session)
            .unwrap();
        session = next;
    }

    let seen = state.seen_contexts.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            None,
            Some("ctx-1".to_string()),
            Some("ctx-1".to_string())
        ]
    );
    assert_eq!(session.history.len(), 7); // system + 3 * (user + assistant)

    drop(rt);
}

// ---------------------------------------------------------------------------
// Inside a live runtime (the front-end scenario)
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_turns_from_inside_a_runtime() {
    let state = Arc::new(AgentState::default());
    let addr = spawn_agent(state.clone()).await;

    let adapter = adapter_for(addr);
    let session = adapter.initial_state(None);

    // A runtime IS active on this thread: the bridge must hop to a worker
    // thread instead of nesting block_on.
    let (reply, session) = adapter
        .generate_next_message(HarnessMessage::user("Hello"), session)
        .unwrap();
    assert_eq!(assistant_text(&reply), "reply 1");
    assert_eq!(session.context_id.as_deref(), Some("ctx-1"));
}

// ---------------------------------------------------------------------------
// Per-task isolation
// ---------------------------------------------------------------------------

#[test]
fn test_concurrent_sessions_never_share_contexts() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let state = Arc::new(AgentState::default());
    let addr = rt.block_on(spawn_agent(state.clone()));

    let adapter = Arc::new(adapter_for(addr));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let adapter = Arc::clone(&adapter);
        handles.push(std::thread::spawn(move || {
            let mut session = adapter.initial_state(None);
            let mut contexts = Vec::new();
            for turn in 0..3 {
                let (_, next) = adapter
                    .generate_next_message(
                        HarnessMessage::user(format!("turn {}", turn)),
                        session,
                    )
                    .unwrap();
                session = next;
                contexts.push(session.context_id.clone().unwrap());
            }
            contexts
        }));
    }

    let observed: Vec<Vec<String>> = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();

    let first: HashSet<_> = observed[0].iter().cloned().collect();
    let second: HashSet<_> = observed[1].iter().cloned().collect();
    assert_eq!(first.len(), 1, "a task sticks to one context: {:?}", first);
    assert_eq!(second.len(), 1);
    assert!(
        first.is_disjoint(&second),
        "context leaked across tasks: {:?} vs {:?}",
        first,
        second
    );

    drop(rt);
}

// ---------------------------------------------------------------------------
// Tool flow
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_structured_tool_call_reply() {
    let app = Router::new()
        .route(
            "/.well-known/agent-card.json",
            get(|| async { Json(card_json()) }),
        )
        .route(
            "/",
            post(|Json(envelope): Json<JsonValue>| async move {
                Json(json!({
                    "jsonrpc": "2.0",
                    "id": envelope["id"],
                    "result": {
                        "role": "agent",
                        "parts": [{"data": {"tool_call": {
                            "name": "search_flights",
                            "arguments": {"origin": "SFO", "destination": "JFK"}
                        }}}],
                        "contextId": "ctx-tool"
                    }
                }))
            }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let adapter = adapter_for(addr);
    let session = adapter.initial_state(None);
    let (reply, session) = adapter
        .generate_next_message(HarnessMessage::user("Find SFO to JFK"), session)
        .unwrap();

    match &reply {
        HarnessMessage::Assistant {
            content,
            tool_calls: Some(calls),
        } => {
            assert!(content.is_none());
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].name, "search_flights");
            assert_eq!(calls[0].arguments["origin"], "SFO");
            assert_eq!(calls[0].arguments["destination"], "JFK");
        }
        other => panic!("expected tool call, got {:?}", other),
    }
    assert_eq!(session.context_id.as_deref(), Some("ctx-tool"));
}

#[test]
fn test_multi_tool_input_is_unpacked_into_history() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let state = Arc::new(AgentState::default());
    let addr = rt.block_on(spawn_agent(state.clone()));

    let adapter = adapter_for(addr);
    let session = adapter.initial_state(None);
    let input = HarnessMessage::MultiTool {
        tool_messages: vec![
            ToolOutput {
                tool_call_id: "c1".to_string(),
                tool_name: "get_balance".to_string(),
                content: "42".to_string(),
            },
            ToolOutput {
                tool_call_id: "c2".to_string(),
                tool_name: "get_status".to_string(),
                content: "active".to_string(),
            },
        ],
    };

    let (_, session) = adapter.generate_next_message(input, session).unwrap();

    // system + 2 unpacked tool results + assistant reply
    assert_eq!(session.history.len(), 4);
    assert!(matches!(session.history[1], HarnessMessage::Tool(_)));
    assert!(matches!(session.history[2], HarnessMessage::Tool(_)));

    drop(rt);
}

// ---------------------------------------------------------------------------
// Metrics flow through the adapter
// ---------------------------------------------------------------------------

#[test]
fn test_adapter_records_one_metric_per_turn() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let state = Arc::new(AgentState::default());
    let addr = rt.block_on(spawn_agent(state));

    let adapter = adapter_for(addr);
    let mut session = adapter.initial_state(None);
    for turn in 0..3 {
        let (_, next) = adapter
            .generate_next_message(HarnessMessage::user(format!("turn {}", turn)), session)
            .unwrap();
        session = next;
    }

    let summary = adapter.metrics().summary();
    assert_eq!(summary.total_requests, 3);
    assert_eq!(summary.error_count, 0);
    assert!(summary.avg_latency_ms.is_some());

    drop(rt);
}
