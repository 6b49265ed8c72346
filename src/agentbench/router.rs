//! The LLM-backed controller behind the evaluation service front-end.
//!
//! Incoming natural-language requests are routed to an LLM that picks one
//! of the registered evaluation tools, which the router then executes
//! in-process and feeds back, looping until the LLM produces a plain
//! answer. Tool calls travel as `{"tool_call": ...}` JSON in the reply
//! text, the same convention the translation layer parses on the agent
//! side.
//!
//! Controller state is one [`RouterSession`] per server-issued context id,
//! held by an abstract [`SessionService`] so a persistent store can replace
//! the in-memory one at deploy time.

use crate::agentbench::client_wrapper::{ClientWrapper, Message, Role};
use crate::agentbench::tool_protocol::ToolRegistry;
use crate::agentbench::translation::parse_tool_call_text;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::RwLock;

const MAX_TOOL_ITERATIONS: usize = 5;

/// Conversation state for one `contextId`.
#[derive(Clone, Default)]
pub struct RouterSession {
    pub history: Vec<Message>,
}

/// Storage for router sessions, keyed by context id.
#[async_trait]
pub trait SessionService: Send + Sync {
    async fn load(&self, context_id: &str) -> Option<RouterSession>;
    async fn store(&self, context_id: &str, session: RouterSession);
}

/// The default, process-local session store.
#[derive(Default)]
pub struct InMemorySessionService {
    sessions: RwLock<HashMap<String, RouterSession>>,
}

impl InMemorySessionService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionService for InMemorySessionService {
    async fn load(&self, context_id: &str) -> Option<RouterSession> {
        self.sessions.read().await.get(context_id).cloned()
    }

    async fn store(&self, context_id: &str, session: RouterSession) {
        self.sessions
            .write()
            .await
            .insert(context_id.to_string(), session);
    }
}

/// Routes one request through the LLM and the tool registry.
pub struct LlmRouter {
    client: Arc<dyn ClientWrapper>,
    registry: Arc<ToolRegistry>,
    sessions: Arc<dyn SessionService>,
}

impl LlmRouter {
    pub fn new(
        client: Arc<dyn ClientWrapper>,
        registry: Arc<ToolRegistry>,
        sessions: Arc<dyn SessionService>,
    ) -> Self {
        LlmRouter {
            client,
            registry,
            sessions,
        }
    }

    /// Handle one user turn within the given context.
    ///
    /// A new context id creates a fresh session primed with the system
    /// prompt; a repeated one resumes the stored conversation. Returns the
    /// final natural-language answer after any tool round-trips.
    pub async fn handle_message(
        &self,
        context_id: &str,
        user_text: &str,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let mut session = match self.sessions.load(context_id).await {
            Some(session) => session,
            None => {
                let mut session = RouterSession::default();
                session
                    .history
                    .push(Message::new(Role::System, self.system_prompt()));
                session
            }
        };

        session
            .history
            .push(Message::new(Role::User, user_text.to_string()));

        let mut tool_iteration = 0;
        let final_text = loop {
            let response = self.client.send_message(&session.history).await?;
            let response_text = response.content.to_string();
            session.history.push(response);

            let tool_call = match parse_tool_call_text(&response_text) {
                Some(call) => call,
                None => break response_text,
            };

            if tool_iteration >= MAX_TOOL_ITERATIONS {
                log::warn!(
                    "router hit the tool iteration cap in context {}",
                    context_id
                );
                break format!(
                    "{}\n\n[Warning: Maximum tool iterations reached]",
                    response_text
                );
            }
            tool_iteration += 1;

            log::info!(
                "router tool call context_id={} tool={} iteration={}",
                context_id,
                tool_call.name,
                tool_iteration
            );

            let execution = self
                .registry
                .execute_tool(&tool_call.name, JsonValue::Object(tool_call.arguments.clone()))
                .await;

            let feedback = match execution {
                Ok(result) => {
                    if result.success {
                        format!(
                            "Tool '{}' executed successfully. Result: {}",
                            tool_call.name,
                            serde_json::to_string_pretty(&result.output)
                                .unwrap_or_else(|_| format!("{:?}", result.output))
                        )
                    } else {
                        format!(
                            "Tool '{}' failed. Error: {}",
                            tool_call.name,
                            result.error.unwrap_or_else(|| "Unknown error".to_string())
                        )
                    }
                }
                Err(e) => format!("Tool execution error: {}", e),
            };

            session.history.push(Message::new(Role::User, feedback));
        };

        self.sessions.store(context_id, session).await;
        Ok(final_text)
    }

    fn system_prompt(&self) -> String {
        let mut prompt = String::from(
            "You are the controller of an agent evaluation service. Users ask, in natural \
             language, to list evaluation domains, run evaluations of remote agents, or fetch \
             past results. Pick the right tool, call it with the right arguments, and then \
             summarise the outcome for the user in plain language.\n\n\
             You have access to the following tools:\n",
        );
        for tool in self.registry.list_tools() {
            prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
            if !tool.parameters.is_empty() {
                prompt.push_str("  Parameters:\n");
                for param in &tool.parameters {
                    prompt.push_str(&format!(
                        "    - {} ({:?}{}): {}\n",
                        param.name,
                        param.param_type,
                        if param.required { ", required" } else { "" },
                        param.description.as_deref().unwrap_or("No description")
                    ));
                }
            }
        }
        prompt.push_str(
            "\nTo use a tool, respond with a JSON object in the following format:\n\
             {\"tool_call\": {\"name\": \"tool_name\", \"arguments\": {...}}}\n\
             After tool execution, the result will be provided and you can continue.",
        );
        prompt
    }
}
