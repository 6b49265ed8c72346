// src/agentbench/mod.rs

pub mod client_wrapper;
pub mod clients;
pub mod eval_tools;
pub mod evaluator_adapter;
pub mod harness;
pub mod metrics;
pub mod protocol_client;
pub mod router;
pub mod server_utils;
pub mod service;
pub mod tool_protocol;
pub mod translation;
pub mod wire;

// Export the adapter at module level so it reads as agentbench::RemoteAgentAdapter
// instead of agentbench::evaluator_adapter::RemoteAgentAdapter.
pub use evaluator_adapter::RemoteAgentAdapter;
