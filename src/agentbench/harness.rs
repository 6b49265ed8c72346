//! Interfaces of the surrounding evaluation harness.
//!
//! The orchestrator itself (turn loop, termination rules, graders) lives
//! outside this crate. What lives here is the typed boundary the tool
//! surface and the evaluator adapter program against: the run
//! configuration, the results shape, and the registry of known scenario
//! domains.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::error::Error;
use std::fmt;

/// A scenario domain the harness can evaluate against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainInfo {
    pub name: String,
    pub description: String,
    pub task_count: usize,
}

lazy_static! {
    /// The four domains shipped with the harness.
    static ref KNOWN_DOMAINS: Vec<DomainInfo> = vec![
        DomainInfo {
            name: "airline".to_string(),
            description: "Flight booking, changes and cancellations under airline policy."
                .to_string(),
            task_count: 50,
        },
        DomainInfo {
            name: "retail".to_string(),
            description: "Order management, returns and exchanges for an online retailer."
                .to_string(),
            task_count: 114,
        },
        DomainInfo {
            name: "telecom".to_string(),
            description: "Plan changes, billing disputes and line troubleshooting for a telecom carrier."
                .to_string(),
            task_count: 114,
        },
        DomainInfo {
            name: "mock".to_string(),
            description: "Minimal synthetic domain for smoke-testing agent integrations."
                .to_string(),
            task_count: 2,
        },
    ];
}

/// All domains the harness knows about.
pub fn known_domains() -> &'static [DomainInfo] {
    &KNOWN_DOMAINS
}

pub fn is_known_domain(name: &str) -> bool {
    KNOWN_DOMAINS.iter().any(|d| d.name == name)
}

/// Configuration for one evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub domain: String,
    /// Endpoint of the agent-under-test.
    pub agent_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Model identifier for the user-simulator LLM.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_llm: Option<String>,
    pub num_trials: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_tasks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_ids: Option<Vec<String>>,
    pub max_steps: usize,
    pub max_errors: usize,
    pub max_concurrency: usize,
}

impl RunConfig {
    /// A run over every task of `domain` with the documented defaults.
    pub fn new(domain: impl Into<String>, agent_endpoint: impl Into<String>) -> Self {
        RunConfig {
            domain: domain.into(),
            agent_endpoint: agent_endpoint.into(),
            auth_token: None,
            user_llm: None,
            num_trials: 1,
            num_tasks: None,
            task_ids: None,
            max_steps: 50,
            max_errors: 10,
            max_concurrency: 3,
        }
    }
}

/// Identity of one task inside a domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskInfo {
    pub id: String,
    pub name: String,
}

/// Outcome of one simulated conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationRecord {
    pub task_id: String,
    pub trial: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything a finished evaluation run produced.
///
/// The tool surface treats this as opaque except for counting successful
/// simulations and summarising task identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Results {
    pub timestamp: DateTime<Utc>,
    /// Run-level metadata (configuration echo, metrics summary, and so on).
    pub info: JsonValue,
    pub tasks: Vec<TaskInfo>,
    pub simulations: Vec<SimulationRecord>,
}

impl Results {
    pub fn successful_simulations(&self) -> usize {
        self.simulations.iter().filter(|s| s.success).count()
    }

    /// Fraction of successful simulations; 0.0 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        if self.simulations.is_empty() {
            0.0
        } else {
            self.successful_simulations() as f64 / self.simulations.len() as f64
        }
    }
}

/// Errors surfaced by the harness for an evaluation run.
#[derive(Debug, Clone)]
pub enum HarnessError {
    /// The requested domain is not in the registry.
    UnknownDomain(String),
    /// The run configuration is structurally invalid.
    InvalidConfig(String),
    /// The run itself failed to execute.
    ExecutionFailed(String),
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarnessError::UnknownDomain(name) => write!(f, "unknown domain: {}", name),
            HarnessError::InvalidConfig(msg) => write!(f, "invalid run configuration: {}", msg),
            HarnessError::ExecutionFailed(msg) => write!(f, "evaluation run failed: {}", msg),
        }
    }
}

impl Error for HarnessError {}

/// The harness entry point the tool surface invokes.
///
/// Blocking by design: the orchestrator underneath is single-threaded per
/// task, and `run_evaluation` returns only once every simulation has
/// finished. Async callers wrap it in `tokio::task::spawn_blocking`.
pub trait EvaluationHarness: Send + Sync {
    fn run_evaluation(&self, config: RunConfig) -> Result<Results, HarnessError>;
}
