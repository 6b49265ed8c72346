//! The evaluator adapter: makes a remote Agent Protocol endpoint look like
//! a local conversational agent to the harness orchestrator.
//!
//! The orchestrator is single-threaded and blocking; the protocol client is
//! async. [`RemoteAgentAdapter::generate_next_message`] therefore bridges
//! the two with a dual-mode strategy (see [`block_on_protocol`]): a
//! throwaway runtime when the calling thread has none, a worker thread that
//! owns its own runtime when one is already running. A single-strategy
//! bridge fails in one of the two contexts, because nesting `block_on`
//! inside a live runtime deadlocks its driver thread.
//!
//! All mutable conversation state lives in the [`TaskSession`] handed back
//! to the caller. Two concurrent tasks use two disjoint sessions and never
//! observe each other's `contextId` or history; the adapter itself only
//! holds the immutable config, the cached agent card, and the shared
//! metrics recorder.

use crate::agentbench::metrics::MetricsRecorder;
use crate::agentbench::protocol_client::{
    discover_agent, send_message, ClientConfig, SendOutcome,
};
use crate::agentbench::translation::{
    harness_to_wire, wire_to_harness, HarnessMessage, ToolSpec,
};
use crate::agentbench::wire::{AgentCard, NormalizedReply};
use std::error::Error;
use std::sync::{Arc, Mutex};

/// Fixed prelude prepended to the domain policy in every task's system
/// message.
const SYSTEM_PRELUDE: &str = "You are a customer service agent. Serve the user according to the \
domain policy below. Only use the tools you have been given, and wait for each tool result \
before continuing.";

/// Conversation state for a single task.
///
/// Created fresh by [`ConversationalAgent::initial_state`] for every task
/// and discarded at task end; never shared across tasks.
#[derive(Debug, Clone)]
pub struct TaskSession {
    /// Server-issued conversation id; unset until the first reply.
    pub context_id: Option<String>,
    /// Full ordered log, including the system prelude.
    pub history: Vec<HarnessMessage>,
    /// Discovery document cached after the first exchange.
    pub card: Option<AgentCard>,
    pub request_count: u32,
}

/// The conversational-agent contract the orchestrator calls.
///
/// All methods are blocking; the orchestrator invokes them sequentially for
/// each task.
pub trait ConversationalAgent: Send + Sync {
    /// Build a fresh session, seeded with the system prelude and, when
    /// supplied, a verbatim copy of `prior_history`.
    fn initial_state(&self, prior_history: Option<Vec<HarnessMessage>>) -> TaskSession;

    /// Append `input` to the session, run one protocol round-trip, and
    /// return the assistant's reply together with the updated session.
    fn generate_next_message(
        &self,
        input: HarnessMessage,
        session: TaskSession,
    ) -> Result<(HarnessMessage, TaskSession), Box<dyn Error + Send + Sync>>;

    /// Release client-side resources. The adapter holds none.
    fn stop(&self) {}

    /// Termination belongs to the orchestrator; the adapter never
    /// introduces stop conditions of its own.
    fn is_stop(&self, _message: &HarnessMessage) -> bool {
        false
    }
}

/// [`ConversationalAgent`] implementation backed by a remote Agent Protocol
/// endpoint.
pub struct RemoteAgentAdapter {
    config: ClientConfig,
    policy: String,
    tools: Vec<ToolSpec>,
    metrics: Arc<MetricsRecorder>,
    card: Mutex<Option<AgentCard>>,
}

impl RemoteAgentAdapter {
    /// `policy` is the domain policy text rendered into every session's
    /// system message; `tools` are the harness-executed tools advertised to
    /// the agent.
    pub fn new(
        config: ClientConfig,
        policy: impl Into<String>,
        tools: Vec<ToolSpec>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        RemoteAgentAdapter {
            config,
            policy: policy.into(),
            tools,
            metrics,
            card: Mutex::new(None),
        }
    }

    /// The card cached from discovery, if any exchange has happened yet.
    pub fn agent_card(&self) -> Option<AgentCard> {
        lock_card(&self.card).clone()
    }

    /// Drop the cached card so the next exchange re-runs discovery. Called
    /// at the start of each new evaluation run.
    pub fn revalidate_card(&self) {
        *lock_card(&self.card) = None;
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    fn system_message(&self) -> HarnessMessage {
        let content = if self.policy.trim().is_empty() {
            SYSTEM_PRELUDE.to_string()
        } else {
            format!("{}\n\n{}", SYSTEM_PRELUDE, self.policy)
        };
        HarnessMessage::system(content)
    }
}

impl ConversationalAgent for RemoteAgentAdapter {
    fn initial_state(&self, prior_history: Option<Vec<HarnessMessage>>) -> TaskSession {
        let mut history = vec![self.system_message()];
        if let Some(prior) = prior_history {
            history.extend(prior);
        }
        TaskSession {
            context_id: None,
            history,
            card: self.agent_card(),
            request_count: 0,
        }
    }

    fn generate_next_message(
        &self,
        input: HarnessMessage,
        mut session: TaskSession,
    ) -> Result<(HarnessMessage, TaskSession), Box<dyn Error + Send + Sync>> {
        // A MultiTool turn is unpacked so the history holds its
        // constituent tool results individually.
        match input {
            HarnessMessage::MultiTool { tool_messages } => {
                for output in tool_messages {
                    session.history.push(HarnessMessage::Tool(output));
                }
            }
            other => session.history.push(other),
        }

        let wire = harness_to_wire(
            &session.history,
            &self.tools,
            session.context_id.as_deref(),
        );

        let cached_card = self.agent_card();
        let config = self.config.clone();
        let metrics = Arc::clone(&self.metrics);

        let (card, outcome): (AgentCard, SendOutcome) = block_on_protocol(async move {
            let card = match cached_card {
                Some(card) => card,
                None => discover_agent(&config)
                    .await
                    .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)?,
            };
            let outcome = send_message(&config, &wire, &metrics)
                .await
                .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)?;
            Ok::<_, Box<dyn Error + Send + Sync>>((card, outcome))
        })??;

        *lock_card(&self.card) = Some(card.clone());

        let translated = wire_to_harness(&NormalizedReply {
            message: outcome.message,
            context_id: outcome.context_id,
        });

        session.history.push(translated.assistant.clone());
        if translated.context_id.is_some() {
            session.context_id = translated.context_id;
        }
        session.card = Some(card);
        session.request_count += 1;

        Ok((translated.assistant, session))
    }
}

/// Run an async protocol call to completion from a blocking context.
///
/// When no tokio runtime is active on the calling thread, a throwaway
/// current-thread runtime drives the future and is torn down afterwards.
/// When a runtime IS active (the adapter reached from inside the evaluation
/// service front-end), the future is moved to a worker thread owning its
/// own runtime and the calling thread parks on the result; `block_on`
/// directly would deadlock the driver. Both branches produce identical
/// observable behaviour.
pub fn block_on_protocol<F, T>(future: F) -> Result<T, Box<dyn Error + Send + Sync>>
where
    F: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Err(_) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| format!("failed to build protocol runtime: {}", e))?;
            Ok(runtime.block_on(future))
        }
        Ok(_) => {
            let (tx, rx) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map(|runtime| runtime.block_on(future));
                let _ = tx.send(result);
            });
            match rx.recv() {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(format!("failed to build protocol runtime: {}", e).into()),
                Err(_) => Err("protocol worker thread terminated unexpectedly".into()),
            }
        }
    }
}

fn lock_card(card: &Mutex<Option<AgentCard>>) -> std::sync::MutexGuard<'_, Option<AgentCard>> {
    match card.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> RemoteAgentAdapter {
        RemoteAgentAdapter::new(
            ClientConfig::new("http://localhost:1").unwrap(),
            "Refunds require a booking reference.",
            vec![],
            Arc::new(MetricsRecorder::new()),
        )
    }

    #[test]
    fn test_initial_state_seeds_system_prelude() {
        let session = adapter().initial_state(None);
        assert_eq!(session.history.len(), 1);
        assert!(session.context_id.is_none());
        assert_eq!(session.request_count, 0);
        match &session.history[0] {
            HarnessMessage::System { content } => {
                assert!(content.starts_with(SYSTEM_PRELUDE));
                assert!(content.contains("Refunds require a booking reference."));
            }
            other => panic!("expected system message, got {:?}", other),
        }
    }

    #[test]
    fn test_initial_state_appends_prior_history() {
        let prior = vec![
            HarnessMessage::user("earlier question"),
            HarnessMessage::Assistant {
                content: Some("earlier answer".to_string()),
                tool_calls: None,
            },
        ];
        let session = adapter().initial_state(Some(prior.clone()));
        assert_eq!(session.history.len(), 3);
        assert_eq!(session.history[1], prior[0]);
        assert_eq!(session.history[2], prior[1]);
    }

    #[test]
    fn test_sessions_are_disjoint() {
        let adapter = adapter();
        let mut first = adapter.initial_state(None);
        first.context_id = Some("ctx-a".to_string());
        first.history.push(HarnessMessage::user("only in first"));

        let second = adapter.initial_state(None);
        assert!(second.context_id.is_none());
        assert_eq!(second.history.len(), 1);
    }

    #[test]
    fn test_is_stop_defers_to_orchestrator() {
        let message = HarnessMessage::Assistant {
            content: Some("###STOP###".to_string()),
            tool_calls: None,
        };
        assert!(!adapter().is_stop(&message));
    }

    #[test]
    fn test_bridge_without_runtime() {
        let value = block_on_protocol(async { 41 + 1 }).unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_bridge_inside_runtime() {
        // Runs on a live runtime thread, exercising the worker branch.
        let value = block_on_protocol(async { "bridged".to_string() }).unwrap();
        assert_eq!(value, "bridged");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bridge_inside_runtime_can_do_io_waits() {
        let value = block_on_protocol(async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            7
        })
        .unwrap();
        assert_eq!(value, 7);
    }
}
