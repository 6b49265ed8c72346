//! Translation between the harness's native message model and the wire
//! protocol.
//!
//! The remote agent is treated as a black-box reasoner over text: tool
//! schemas and tool results are always rendered into the prompt as text and
//! never sent as structured parts. In the other direction the agent may
//! request a tool call either as a structured `data` part or as a JSON
//! fragment embedded in prose, so extraction runs in two tiers: structured
//! first, then a balanced-brace scan over the text.
//!
//! The key invariant: an assistant message produced here carries *either*
//! non-empty content *or* a non-empty tool-call list, never both. When a
//! reply violates that, the tool calls win and the content is dropped with
//! a warning.

use crate::agentbench::wire::{NormalizedReply, Part, WireMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A tool-call request extracted from an agent reply.
///
/// `id` is stable within a task; when the agent does not supply one, a
/// fresh UUID is generated so the matching [`ToolOutput`] can correlate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Map<String, JsonValue>,
    /// Always `"assistant"`; present for parity with harness records.
    pub requestor: String,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Map<String, JsonValue>) -> Self {
        ToolCall {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
            requestor: "assistant".to_string(),
        }
    }

    /// Parse the `{"tool_call": {"name": ..., "arguments": {...}, "id"?: ...}}`
    /// shape out of an already-decoded JSON value.
    pub fn from_payload(payload: &JsonValue) -> Option<ToolCall> {
        let call = payload.get("tool_call")?;
        let name = call.get("name")?.as_str()?;
        let arguments = call.get("arguments")?.as_object()?.clone();
        let id = call
            .get("id")
            .and_then(|i| i.as_str())
            .map(|i| i.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Some(ToolCall {
            id,
            name: name.to_string(),
            arguments,
            requestor: "assistant".to_string(),
        })
    }
}

/// The result of one tool execution, fed back to the agent as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub tool_name: String,
    pub content: String,
}

/// The harness's native message model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum HarnessMessage {
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        tool_calls: Option<Vec<ToolCall>>,
    },
    Tool(ToolOutput),
    System {
        content: String,
    },
    /// Several tool results answering one multi-call assistant turn.
    MultiTool {
        tool_messages: Vec<ToolOutput>,
    },
}

impl HarnessMessage {
    pub fn user(content: impl Into<String>) -> Self {
        HarnessMessage::User {
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        HarnessMessage::System {
            content: content.into(),
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        HarnessMessage::Tool(ToolOutput {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content: content.into(),
        })
    }
}

/// A tool made available to the remote agent: name, description and a JSON
/// Schema for its parameters. Rendered into the prompt as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: JsonValue,
}

/// Sentence appended after the tool list telling the agent how to request a
/// call. The extractors below parse exactly this shape back out.
const TOOL_CALL_INSTRUCTION: &str = "To call a tool, respond with a JSON object in the following format:\n\
    {\"tool_call\": {\"name\": \"tool_name\", \"arguments\": {...}}}\n\
    The tool will be executed for you and its result sent back in the next message.";

const SYSTEM_PRELUDE_OPEN: &str = "<system>";
const SYSTEM_PRELUDE_CLOSE: &str = "</system>";

/// Render the full conversation state into one outgoing wire message.
///
/// The message is `role=user` with a fresh `messageId`, the supplied
/// `contextId` propagated, and a single `Text` part holding, in order: the
/// `<system>` prelude, the `<available_tools>` block (when tools are
/// present), and the transcript with the newest message last.
pub fn harness_to_wire(
    messages: &[HarnessMessage],
    tools: &[ToolSpec],
    context_id: Option<&str>,
) -> WireMessage {
    let mut sections: Vec<String> = Vec::new();

    let system_text = messages
        .iter()
        .filter_map(|m| match m {
            HarnessMessage::System { content } => Some(content.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    if !system_text.is_empty() {
        sections.push(format!(
            "{}\n{}\n{}",
            SYSTEM_PRELUDE_OPEN, system_text, SYSTEM_PRELUDE_CLOSE
        ));
    }

    if !tools.is_empty() {
        sections.push(render_tool_block(tools));
    }

    let mut transcript: Vec<String> = Vec::new();
    for message in messages {
        match message {
            HarnessMessage::System { .. } => {}
            HarnessMessage::User { content } => transcript.push(format!("User: {}", content)),
            HarnessMessage::Assistant { content, .. } => {
                // Content only; tool requests are implied by the Tool Result
                // lines that follow them.
                if let Some(content) = content {
                    transcript.push(format!("Assistant: {}", content));
                }
            }
            HarnessMessage::Tool(output) => transcript.push(render_tool_result(output)),
            HarnessMessage::MultiTool { tool_messages } => {
                for output in tool_messages {
                    transcript.push(render_tool_result(output));
                }
            }
        }
    }
    if !transcript.is_empty() {
        sections.push(transcript.join("\n"));
    }

    WireMessage::user(
        vec![Part::text(sections.join("\n\n"))],
        context_id.map(|c| c.to_string()),
    )
}

fn render_tool_result(output: &ToolOutput) -> String {
    format!("Tool Result ({}): {}", output.tool_name, output.content)
}

/// Render the `<available_tools>` block: one `- name(param: type, ...)` line
/// plus description per tool, then the fixed reply-format instruction.
fn render_tool_block(tools: &[ToolSpec]) -> String {
    let mut block = String::from("<available_tools>\n");
    for tool in tools {
        let params = tool
            .parameters
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|props| {
                props
                    .iter()
                    .map(|(name, schema)| {
                        let ty = schema.get("type").and_then(|t| t.as_str()).unwrap_or("any");
                        format!("{}: {}", name, ty)
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        block.push_str(&format!("- {}({})\n", tool.name, params));
        block.push_str(&format!("  Description: {}\n", tool.description));
    }
    block.push_str("</available_tools>\n\n");
    block.push_str(TOOL_CALL_INSTRUCTION);
    block
}

/// An agent reply translated back into the harness model.
#[derive(Debug, Clone)]
pub struct TranslatedReply {
    /// Always the `Assistant` variant, honouring the text-XOR-tool-calls
    /// invariant.
    pub assistant: HarnessMessage,
    /// Conversation id the server wants echoed on the next message.
    pub context_id: Option<String>,
}

/// Translate a normalised wire reply into an assistant message.
///
/// Extraction priority: structured `data` parts first; only when none of
/// them carries a tool call is the text scanned for an embedded JSON
/// fragment (which is then lifted out of the content). If both content and
/// tool calls survive, the tool calls win and the content is dropped with
/// a warning.
pub fn wire_to_harness(reply: &NormalizedReply) -> TranslatedReply {
    let mut text = reply.message.text_content();

    let mut tool_calls: Vec<ToolCall> = reply
        .message
        .data_parts()
        .into_iter()
        .filter_map(ToolCall::from_payload)
        .collect();

    if tool_calls.is_empty() {
        if let Some((call, cleaned)) = lift_tool_call(&text) {
            tool_calls.push(call);
            text = cleaned;
        }
    }

    let mut content = {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    };

    if content.is_some() && !tool_calls.is_empty() {
        log::warn!(
            "agent reply carried both text and {} tool call(s); keeping the tool calls",
            tool_calls.len()
        );
        content = None;
    }

    TranslatedReply {
        assistant: HarnessMessage::Assistant {
            content,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
        },
        context_id: reply.context_id.clone(),
    }
}

/// Find the first balanced `{"tool_call": ...}` object embedded in `text`.
///
/// Returns the parsed call and the remaining content with the JSON fragment
/// removed and the ends trimmed. Uses brace counting from the anchor rather
/// than parsing the whole response, which handles the common case of the
/// agent wrapping the call in surrounding prose.
pub fn lift_tool_call(text: &str) -> Option<(ToolCall, String)> {
    let (call, start, end) = find_tool_call(text)?;
    let mut cleaned = String::with_capacity(text.len() - (end - start));
    cleaned.push_str(&text[..start]);
    cleaned.push_str(&text[end..]);
    Some((call, cleaned.trim().to_string()))
}

/// Parse a tool call out of free text without modifying it.
pub fn parse_tool_call_text(text: &str) -> Option<ToolCall> {
    find_tool_call(text).map(|(call, _, _)| call)
}

fn find_tool_call(text: &str) -> Option<(ToolCall, usize, usize)> {
    // Fast path: the exact spelling the instruction asks for. Fallback:
    // locate the key and backtrack to the opening brace, which tolerates
    // whitespace-variant JSON.
    let start = text.find("{\"tool_call\"").or_else(|| {
        let key = text.find("\"tool_call\"")?;
        text[..key].rfind('{')
    })?;

    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut end = None;
    for (offset, &b) in bytes.iter().enumerate().skip(start) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    end = Some(offset + 1);
                    break;
                }
            }
            _ => {}
        }
    }
    let end = end?;

    let parsed: JsonValue = serde_json::from_str(&text[start..end]).ok()?;
    let call = ToolCall::from_payload(&parsed)?;
    Some((call, start, end))
}
