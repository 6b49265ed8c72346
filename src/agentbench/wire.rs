//! Wire types for the Agent Protocol.
//!
//! The Agent Protocol is a JSON-RPC 2.0 dialect for agent-to-agent messaging:
//! a `message/send` method carrying a [`WireMessage`], server-issued
//! `contextId`s that thread a conversation across calls, and an
//! [`AgentCard`] discovery document served at
//! `/.well-known/agent-card.json`.
//!
//! Outgoing payloads are serialised from the strict structs in this module.
//! Incoming replies are a different story: implementations in the wild
//! answer `message/send` in (at least) five different shapes, so parsing is
//! done by hand over [`serde_json::Value`] in [`parse_rpc_reply`], which
//! normalises everything into a single [`NormalizedReply`] before the rest
//! of the crate ever sees it.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::error::Error;
use std::fmt;
use uuid::Uuid;

/// Well-known path of the agent discovery document.
pub const AGENT_CARD_PATH: &str = "/.well-known/agent-card.json";

/// JSON-RPC method used to deliver a message to an agent.
pub const METHOD_MESSAGE_SEND: &str = "message/send";

/// One content part of a [`WireMessage`].
///
/// Exactly one payload field is set per part. File parts exist in the
/// protocol but are out of scope here and are treated as unrecognised.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Part {
    /// Plain text content: `{"text": "..."}`.
    Text { text: String },
    /// Structured JSON content: `{"data": {...}}`.
    Data { data: JsonValue },
}

impl Part {
    /// Build a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    /// Build a data part.
    pub fn data(data: JsonValue) -> Self {
        Part::Data { data }
    }

    /// Parse a part from its JSON representation.
    ///
    /// Accepts both the bare flavour (`{"text": ...}` / `{"data": ...}`)
    /// and the `kind`-tagged flavour (`{"kind": "text", "text": ...}`)
    /// seen in the wild. Returns `None` for file parts and anything else
    /// unrecognised; callers decide whether that is fatal.
    pub fn from_value(value: &JsonValue) -> Option<Part> {
        let obj = value.as_object()?;
        if let Some(kind) = obj.get("kind").and_then(|k| k.as_str()) {
            match kind {
                "text" => {
                    return obj
                        .get("text")
                        .and_then(|t| t.as_str())
                        .map(|t| Part::text(t));
                }
                "data" => {
                    return obj.get("data").map(|d| Part::data(d.clone()));
                }
                _ => return None,
            }
        }
        if let Some(text) = obj.get("text").and_then(|t| t.as_str()) {
            return Some(Part::text(text));
        }
        if let Some(data) = obj.get("data") {
            if obj.len() == 1 {
                return Some(Part::data(data.clone()));
            }
        }
        None
    }
}

/// Who authored a [`WireMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
}

/// The protocol's message envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Client-generated UUID identifying this message.
    pub message_id: String,
    pub role: MessageRole,
    /// Content parts; at least one.
    pub parts: Vec<Part>,
    /// Server-issued conversation thread id, echoed on every follow-up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
}

impl WireMessage {
    /// Build an outgoing user message with a fresh `messageId`.
    pub fn user(parts: Vec<Part>, context_id: Option<String>) -> Self {
        WireMessage {
            message_id: Uuid::new_v4().to_string(),
            role: MessageRole::User,
            parts,
            context_id,
            task_id: None,
            metadata: None,
        }
    }

    /// Build an agent reply carrying the given parts.
    pub fn agent(parts: Vec<Part>, context_id: Option<String>) -> Self {
        WireMessage {
            message_id: Uuid::new_v4().to_string(),
            role: MessageRole::Agent,
            parts,
            context_id,
            task_id: None,
            metadata: None,
        }
    }

    /// Concatenate the text of all `Text` parts.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let Part::Text { text } = part {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    /// All `Data` part payloads, in order.
    pub fn data_parts(&self) -> Vec<&JsonValue> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Data { data } => Some(data),
                _ => None,
            })
            .collect()
    }
}

/// Capability flags advertised in an [`AgentCard`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub push_notifications: bool,
}

/// A capability advertised in an [`AgentCard`]'s `skills` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// The agent discovery document.
///
/// Fetched once per adapter from [`AGENT_CARD_PATH`] and cached; also
/// served by the evaluation service front-end to describe itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_schemes: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<AgentSkill>,
}

impl AgentCard {
    /// Check the two fields every card must carry: a non-empty `name` and
    /// an absolute http(s) `url`.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("agent card has an empty name".to_string());
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(format!("agent card url is not absolute: {}", self.url));
        }
        Ok(())
    }
}

/// Errors raised while interpreting a JSON-RPC reply envelope.
#[derive(Debug, Clone)]
pub enum WireError {
    /// The envelope's `error` member was populated.
    Rpc { code: i64, message: String },
    /// The envelope carried neither `result` nor `error`.
    MissingResult,
    /// The `result` payload matched none of the accepted reply shapes.
    UnrecognisedShape(String),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Rpc { code, message } => {
                write!(f, "JSON-RPC error {}: {}", code, message)
            }
            WireError::MissingResult => write!(f, "reply has neither result nor error"),
            WireError::UnrecognisedShape(detail) => {
                write!(f, "unrecognised reply shape: {}", detail)
            }
        }
    }
}

impl Error for WireError {}

/// A reply reduced to its canonical form: one agent [`WireMessage`] plus the
/// conversation id the server wants echoed back.
#[derive(Debug, Clone)]
pub struct NormalizedReply {
    pub message: WireMessage,
    pub context_id: Option<String>,
}

/// Build a JSON-RPC 2.0 request envelope.
pub fn rpc_request(id: &str, method: &str, params: JsonValue) -> JsonValue {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Build a JSON-RPC 2.0 success response envelope.
pub fn rpc_response(id: &JsonValue, result: JsonValue) -> JsonValue {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

/// Build a JSON-RPC 2.0 error response envelope.
pub fn rpc_error(id: &JsonValue, code: i64, message: &str) -> JsonValue {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

/// Normalise a `message/send` reply envelope.
///
/// The accepted `result` shapes are:
///
/// 1. a full message object (`role=agent`, `parts`);
/// 2. a bare `{"parts": [...]}`;
/// 3. a bare string;
/// 4. a wrapped `{"message": {...}}`;
/// 5. a task object whose terminal message sits at `status.message`, with
///    the last agent entry of `history` as a fallback.
///
/// Anything else is [`WireError::UnrecognisedShape`]. A populated JSON-RPC
/// `error` member short-circuits to [`WireError::Rpc`].
pub fn parse_rpc_reply(envelope: &JsonValue) -> Result<NormalizedReply, WireError> {
    if let Some(err) = envelope.get("error") {
        if !err.is_null() {
            let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or(-32603);
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string();
            return Err(WireError::Rpc { code, message });
        }
    }

    let result = match envelope.get("result") {
        Some(r) if !r.is_null() => r,
        _ => return Err(WireError::MissingResult),
    };

    normalize_result(result)
}

fn normalize_result(result: &JsonValue) -> Result<NormalizedReply, WireError> {
    // Shape 3: a bare string.
    if let Some(text) = result.as_str() {
        return Ok(NormalizedReply {
            message: WireMessage::agent(vec![Part::text(text)], None),
            context_id: None,
        });
    }

    let obj = match result.as_object() {
        Some(o) => o,
        None => {
            return Err(WireError::UnrecognisedShape(format!(
                "result is neither string nor object ({})",
                type_name(result)
            )))
        }
    };

    // Shapes 1 and 2: a message object, possibly without role/messageId.
    if obj.contains_key("parts") {
        return message_from_value(result, None);
    }

    // Shape 4: {"message": {...}}.
    if let Some(inner) = obj.get("message") {
        return message_from_value(inner, context_id_of(result));
    }

    // Shape 5: a task object with the terminal message buried inside.
    if let Some(status) = obj.get("status") {
        let task_context = context_id_of(result);
        if let Some(message) = status.get("message") {
            if message.is_object() {
                return message_from_value(message, task_context);
            }
        }
        if let Some(history) = obj.get("history").and_then(|h| h.as_array()) {
            if let Some(last_agent) = history
                .iter()
                .rev()
                .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("agent"))
            {
                return message_from_value(last_agent, task_context);
            }
        }
        return Err(WireError::UnrecognisedShape(
            "task object has no terminal message".to_string(),
        ));
    }

    Err(WireError::UnrecognisedShape(format!(
        "object with keys [{}]",
        obj.keys().cloned().collect::<Vec<_>>().join(", ")
    )))
}

/// Parse a message object, defaulting the role to `agent` and generating a
/// `messageId` when absent. `fallback_context` supplies the id when the
/// message itself does not carry one (task-level `contextId`).
fn message_from_value(
    value: &JsonValue,
    fallback_context: Option<String>,
) -> Result<NormalizedReply, WireError> {
    let obj = value
        .as_object()
        .ok_or_else(|| WireError::UnrecognisedShape("message is not an object".to_string()))?;

    let raw_parts = obj
        .get("parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| WireError::UnrecognisedShape("message has no parts array".to_string()))?;

    let parts: Vec<Part> = raw_parts.iter().filter_map(Part::from_value).collect();
    if parts.is_empty() {
        return Err(WireError::UnrecognisedShape(
            "message has no recognised parts".to_string(),
        ));
    }

    let role = match obj.get("role").and_then(|r| r.as_str()) {
        Some("user") => MessageRole::User,
        // Replies that omit the role are agent-authored by construction.
        _ => MessageRole::Agent,
    };

    let context_id = context_id_of(value).or(fallback_context);

    Ok(NormalizedReply {
        message: WireMessage {
            message_id: obj
                .get("messageId")
                .and_then(|m| m.as_str())
                .map(|m| m.to_string())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            role,
            parts,
            context_id: context_id.clone(),
            task_id: obj
                .get("taskId")
                .and_then(|t| t.as_str())
                .map(|t| t.to_string()),
            metadata: obj.get("metadata").cloned(),
        },
        context_id,
    })
}

fn context_id_of(value: &JsonValue) -> Option<String> {
    value
        .get("contextId")
        .and_then(|c| c.as_str())
        .map(|c| c.to_string())
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
