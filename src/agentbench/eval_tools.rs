//! The evaluation capabilities exposed to the front-end's LLM controller.
//!
//! Three tools, none of which speaks the wire protocol itself: they
//! validate their arguments, build an orchestrator configuration, and call
//! into the harness. Every failure comes back as a structured
//! [`ToolResult::failure`] so the controller can correct course; a tool
//! never panics and never leaks an unhandled error.

use crate::agentbench::harness::{
    is_known_domain, known_domains, EvaluationHarness, Results, RunConfig,
};
use crate::agentbench::protocol_client::ClientConfig;
use crate::agentbench::tool_protocol::{
    ToolMetadata, ToolParameter, ToolParameterType, ToolProtocol, ToolResult,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::error::Error;
use std::sync::Arc;

pub const TOOL_LIST_DOMAINS: &str = "list_domains";
pub const TOOL_RUN_EVALUATION: &str = "run_evaluation";
pub const TOOL_GET_RESULTS: &str = "get_evaluation_results";

/// [`ToolProtocol`] exposing the harness to the evaluation service.
pub struct EvalToolProtocol {
    harness: Arc<dyn EvaluationHarness>,
}

impl EvalToolProtocol {
    pub fn new(harness: Arc<dyn EvaluationHarness>) -> Self {
        EvalToolProtocol { harness }
    }

    /// Static catalogue of the three capabilities.
    pub fn tool_catalogue() -> Vec<ToolMetadata> {
        vec![
            ToolMetadata::new(
                TOOL_LIST_DOMAINS,
                "List the scenario domains available for evaluation, with task counts.",
            ),
            ToolMetadata::new(
                TOOL_RUN_EVALUATION,
                "Run an evaluation of a remote agent against one domain and report the outcome.",
            )
            .with_parameter(
                ToolParameter::new("domain", ToolParameterType::String)
                    .with_description("One of: airline, retail, telecom, mock")
                    .required(),
            )
            .with_parameter(
                ToolParameter::new("agentEndpoint", ToolParameterType::String)
                    .with_description("Base URL of the agent under test")
                    .required(),
            )
            .with_parameter(
                ToolParameter::new("userLlm", ToolParameterType::String)
                    .with_description("Model identifier for the user simulator"),
            )
            .with_parameter(
                ToolParameter::new("numTrials", ToolParameterType::Integer)
                    .with_description("Trials per task")
                    .with_default(serde_json::json!(1)),
            )
            .with_parameter(
                ToolParameter::new("numTasks", ToolParameterType::Integer)
                    .with_description("Cap on the number of tasks to run"),
            )
            .with_parameter(
                ToolParameter::new("taskIds", ToolParameterType::Array)
                    .with_description("Explicit task ids to run"),
            )
            .with_parameter(
                ToolParameter::new("maxSteps", ToolParameterType::Integer)
                    .with_default(serde_json::json!(50)),
            )
            .with_parameter(
                ToolParameter::new("maxErrors", ToolParameterType::Integer)
                    .with_default(serde_json::json!(10)),
            )
            .with_parameter(
                ToolParameter::new("maxConcurrency", ToolParameterType::Integer)
                    .with_default(serde_json::json!(3)),
            ),
            ToolMetadata::new(
                TOOL_GET_RESULTS,
                "Fetch the stored results of a previous evaluation by id.",
            )
            .with_parameter(
                ToolParameter::new("evaluationId", ToolParameterType::String).required(),
            ),
        ]
    }

    fn list_domains(&self) -> ToolResult {
        let domains: Vec<JsonValue> = known_domains()
            .iter()
            .map(|d| {
                serde_json::json!({
                    "name": d.name,
                    "description": d.description,
                    "taskCount": d.task_count,
                })
            })
            .collect();
        ToolResult::success(serde_json::json!({ "domains": domains }))
    }

    async fn run_evaluation(&self, parameters: &JsonValue) -> ToolResult {
        let config = match parse_run_config(parameters) {
            Ok(config) => config,
            Err(message) => return ToolResult::failure(message),
        };

        let harness = Arc::clone(&self.harness);
        let domain = config.domain.clone();
        // The harness call blocks for the whole run; keep it off the
        // front-end's async workers.
        let outcome = tokio::task::spawn_blocking(move || harness.run_evaluation(config)).await;

        match outcome {
            Ok(Ok(results)) => summarise_results(&domain, &results),
            Ok(Err(e)) => ToolResult::failure(format!("evaluation failed: {}", e)),
            Err(e) => ToolResult::failure(format!("evaluation task aborted: {}", e)),
        }
    }

    fn get_evaluation_results(&self, parameters: &JsonValue) -> ToolResult {
        let evaluation_id = parameters.get("evaluationId").and_then(|v| v.as_str());
        match evaluation_id {
            Some(id) => ToolResult::failure(format!(
                "result persistence is not configured; results for '{}' were not stored. \
                 Re-run the evaluation to obtain fresh results.",
                id
            )),
            None => ToolResult::failure("missing required parameter: evaluationId".to_string()),
        }
    }
}

#[async_trait]
impl ToolProtocol for EvalToolProtocol {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: JsonValue,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let result = match tool_name {
            TOOL_LIST_DOMAINS => self.list_domains(),
            TOOL_RUN_EVALUATION => self.run_evaluation(&parameters).await,
            TOOL_GET_RESULTS => self.get_evaluation_results(&parameters),
            other => ToolResult::failure(format!("unknown tool: {}", other)),
        };
        Ok(result)
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
        Ok(Self::tool_catalogue())
    }

    fn protocol_name(&self) -> &str {
        "evaluation"
    }
}

/// Validate tool arguments into a [`RunConfig`]. Configuration errors fail
/// the run up-front, before any harness work starts.
fn parse_run_config(parameters: &JsonValue) -> Result<RunConfig, String> {
    let domain = parameters
        .get("domain")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "missing required parameter: domain".to_string())?;
    if !is_known_domain(domain) {
        return Err(format!(
            "unknown domain '{}'; known domains: {}",
            domain,
            known_domains()
                .iter()
                .map(|d| d.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    let endpoint = parameters
        .get("agentEndpoint")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "missing required parameter: agentEndpoint".to_string())?;
    // Reuse the protocol client's endpoint rules: absolute http(s), no
    // trailing slash.
    let endpoint = ClientConfig::new(endpoint)
        .map_err(|e| format!("invalid agentEndpoint: {}", e))?
        .endpoint()
        .to_string();

    let mut config = RunConfig::new(domain, endpoint);
    config.user_llm = parameters
        .get("userLlm")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    if let Some(trials) = parameters.get("numTrials").and_then(|v| v.as_u64()) {
        config.num_trials = trials as usize;
    }
    config.num_tasks = parameters
        .get("numTasks")
        .and_then(|v| v.as_u64())
        .map(|n| n as usize);
    config.task_ids = parameters.get("taskIds").and_then(|v| v.as_array()).map(|ids| {
        ids.iter()
            .filter_map(|id| id.as_str().map(|s| s.to_string()))
            .collect()
    });
    if let Some(steps) = parameters.get("maxSteps").and_then(|v| v.as_u64()) {
        config.max_steps = steps as usize;
    }
    if let Some(errors) = parameters.get("maxErrors").and_then(|v| v.as_u64()) {
        config.max_errors = errors as usize;
    }
    if let Some(concurrency) = parameters.get("maxConcurrency").and_then(|v| v.as_u64()) {
        config.max_concurrency = concurrency as usize;
    }

    Ok(config)
}

fn summarise_results(domain: &str, results: &Results) -> ToolResult {
    let total_simulations = results.simulations.len();
    let successful = results.successful_simulations();
    let tasks: Vec<JsonValue> = results
        .tasks
        .iter()
        .map(|t| serde_json::json!({"id": t.id, "name": t.name}))
        .collect();

    ToolResult::success(serde_json::json!({
        "status": "completed",
        "domain": domain,
        "timestamp": Utc::now().to_rfc3339(),
        "summary": {
            "totalSimulations": total_simulations,
            "totalTasks": results.tasks.len(),
            "successfulSimulations": successful,
            "successRate": results.success_rate(),
        },
        "tasks": tasks,
    }))
}
