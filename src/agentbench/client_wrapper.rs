//! Shared primitives for provider-agnostic LLM clients.
//!
//! The evaluation service front-end routes incoming requests through an
//! LLM-backed controller; the [`ClientWrapper`] trait abstracts over the
//! concrete gateway that controller talks to. The abstraction deliberately
//! excludes conversation bookkeeping, which lives in the router's sessions.
//!
//! Streaming and native function calling are intentionally absent: replies
//! are single messages and tool calls travel as text in the
//! `{"tool_call": ...}` convention the rest of the crate speaks.

use async_trait::async_trait;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Represents the possible roles for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// A system authored message that primes or constrains assistant behaviour.
    System,
    /// A user authored message.
    User,
    /// An assistant authored message.
    Assistant,
}

/// How many tokens were spent on prompt vs. completion?
#[derive(Clone, Debug)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

/// A generic chat message exchanged with an LLM.
#[derive(Clone, Debug)]
pub struct Message {
    pub role: Role,
    /// Stored as `Arc<str>` so histories can be cheaply cloned by the
    /// session service.
    pub content: Arc<str>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<Arc<str>>) -> Self {
        Message {
            role,
            content: content.into(),
        }
    }
}

/// Trait-driven abstraction over a concrete LLM gateway.
///
/// Implementations must be thread-safe (`Send + Sync`) so they can be
/// shared between request handlers. Where the gateway exposes token
/// accounting, wrappers should capture it and make it visible via
/// [`ClientWrapper::get_last_usage`].
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send a full request/response style chat completion. The `messages`
    /// slice must include any system priming the caller wishes to send.
    async fn send_message(
        &self,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>>;

    /// Identifier used to select the upstream model (e.g. `"gpt-4.1"`).
    fn model_name(&self) -> &str;

    /// Usage from the most recent [`ClientWrapper::send_message`] call.
    async fn get_last_usage(&self) -> Option<TokenUsage> {
        if let Some(slot) = self.usage_slot() {
            slot.lock().await.clone()
        } else {
            None
        }
    }

    /// Shared mutable slot where the implementation persists token usage.
    /// Wrappers without billing data inherit the `None` default.
    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        None
    }
}
