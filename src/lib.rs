// src/lib.rs

// Import the top-level `agentbench` module.
pub mod agentbench;

// Re-exporting key items for easier external access.
pub use agentbench::client_wrapper::{ClientWrapper, Message, Role};
pub use agentbench::evaluator_adapter::{ConversationalAgent, RemoteAgentAdapter, TaskSession};
pub use agentbench::harness::{EvaluationHarness, Results, RunConfig};
pub use agentbench::protocol_client::ClientConfig;
pub use agentbench::service::EvalServerBuilder;
pub use agentbench::translation::HarnessMessage;

/// Initialise the process-wide logger. Safe to call more than once; only
/// the first call wins.
pub fn init_logger() {
    let _ = env_logger::try_init();
}
