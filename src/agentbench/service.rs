//! The evaluation service front-end.
//!
//! A protocol-speaking server: it serves its own [`AgentCard`] at
//! `/.well-known/agent-card.json` (advertising the evaluation tools as
//! skills) and accepts JSON-RPC 2.0 `message/send` calls at `/`. Incoming
//! requests are routed to the [`LlmRouter`], with the server-issued
//! `contextId` mapped one-to-one onto router sessions. That mapping is the
//! only stateful concern the front-end has.
//!
//! # Example
//!
//! ```rust,ignore
//! let server = EvalServerBuilder::new("evaluation-service")
//!     .with_client(Arc::new(GatewayClient::new(&key, "gpt-4.1-mini")))
//!     .with_harness(harness)
//!     .with_bearer_token("service-token")
//!     .start_on(8080)
//!     .await?;
//! println!("serving on {}", server.addr());
//! ```

use crate::agentbench::client_wrapper::ClientWrapper;
use crate::agentbench::eval_tools::EvalToolProtocol;
use crate::agentbench::harness::EvaluationHarness;
use crate::agentbench::router::{InMemorySessionService, LlmRouter, SessionService};
use crate::agentbench::server_utils::{AuthConfig, IpFilter};
use crate::agentbench::tool_protocol::ToolRegistry;
use crate::agentbench::wire::{
    rpc_error, rpc_response, AgentCapabilities, AgentCard, AgentSkill, Part, WireMessage,
    AGENT_CARD_PATH, METHOD_MESSAGE_SEND,
};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value as JsonValue;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

struct ServiceState {
    card: AgentCard,
    router: LlmRouter,
    auth: AuthConfig,
    ip_filter: IpFilter,
}

/// A running front-end instance.
pub struct ServerInstance {
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<Result<(), std::io::Error>>,
}

impl ServerInstance {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting requests. In-flight handlers are aborted with the
    /// task.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

/// Builder for the evaluation service front-end.
///
/// By default: no authentication, no IP filtering, in-memory sessions.
pub struct EvalServerBuilder {
    name: String,
    description: String,
    version: String,
    client: Option<Arc<dyn ClientWrapper>>,
    harness: Option<Arc<dyn EvaluationHarness>>,
    sessions: Arc<dyn SessionService>,
    auth: AuthConfig,
    ip_filter: IpFilter,
}

impl EvalServerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        EvalServerBuilder {
            name: name.into(),
            description: "Runs scripted customer-service evaluations against remote agents."
                .to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            client: None,
            harness: None,
            sessions: Arc::new(InMemorySessionService::new()),
            auth: AuthConfig::None,
            ip_filter: IpFilter::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// The LLM gateway backing the router. Required.
    pub fn with_client(mut self, client: Arc<dyn ClientWrapper>) -> Self {
        self.client = Some(client);
        self
    }

    /// The harness invoked by `run_evaluation`. Required.
    pub fn with_harness(mut self, harness: Arc<dyn EvaluationHarness>) -> Self {
        self.harness = Some(harness);
        self
    }

    /// Swap the in-memory session store for a persistent one.
    pub fn with_session_service(mut self, sessions: Arc<dyn SessionService>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Require `Authorization: Bearer <token>` on `message/send` calls.
    /// Discovery stays open.
    pub fn with_bearer_token(mut self, token: impl Into<String> + AsRef<str>) -> Self {
        self.auth = AuthConfig::bearer(token);
        self
    }

    pub fn allow_ip(mut self, ip: &str) -> Result<Self, String> {
        self.ip_filter.allow(ip)?;
        Ok(self)
    }

    pub fn allow_localhost_only(mut self) -> Self {
        let _ = self.ip_filter.allow("127.0.0.1");
        let _ = self.ip_filter.allow("::1");
        self
    }

    /// Start on `127.0.0.1:<port>`; port 0 picks an ephemeral port.
    pub async fn start_on(self, port: u16) -> Result<ServerInstance, Box<dyn Error + Send + Sync>> {
        self.start_at(SocketAddr::from(([127, 0, 0, 1], port))).await
    }

    /// Bind and serve at the given address.
    pub async fn start_at(
        self,
        addr: SocketAddr,
    ) -> Result<ServerInstance, Box<dyn Error + Send + Sync>> {
        let client = self
            .client
            .ok_or("EvalServerBuilder requires an LLM client (with_client)")?;
        let harness = self
            .harness
            .ok_or("EvalServerBuilder requires an evaluation harness (with_harness)")?;

        let protocol = Arc::new(EvalToolProtocol::new(harness));
        let skills = skills_of(&protocol).await?;
        let registry = Arc::new(ToolRegistry::discover(protocol).await?);
        let router = LlmRouter::new(client, registry, self.sessions);

        let listener = TcpListener::bind(addr).await?;
        let bound = listener.local_addr()?;

        let card = AgentCard {
            name: self.name,
            url: format!("http://{}", bound),
            description: Some(self.description),
            version: Some(self.version),
            capabilities: AgentCapabilities {
                streaming: false,
                push_notifications: false,
            },
            security_schemes: None,
            security: None,
            skills,
        };

        let state = Arc::new(ServiceState {
            card,
            router,
            auth: self.auth,
            ip_filter: self.ip_filter,
        });

        let app = Router::new()
            .route(AGENT_CARD_PATH, get(card_handler))
            .route("/", post(rpc_handler))
            .with_state(state);

        log::info!("evaluation service listening on {}", bound);

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
        });

        Ok(ServerInstance {
            addr: bound,
            handle,
        })
    }
}

async fn skills_of(
    protocol: &Arc<EvalToolProtocol>,
) -> Result<Vec<AgentSkill>, Box<dyn Error + Send + Sync>> {
    use crate::agentbench::tool_protocol::ToolProtocol;
    Ok(protocol
        .list_tools()
        .await?
        .into_iter()
        .map(|tool| AgentSkill {
            id: tool.name.clone(),
            name: tool.name,
            description: tool.description,
            tags: vec!["evaluation".to_string()],
        })
        .collect())
}

async fn card_handler(
    State(state): State<Arc<ServiceState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    if !state.ip_filter.is_allowed(addr.ip()) {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": "Access denied"})),
        )
            .into_response();
    }
    // Discovery is intentionally auth-free.
    (StatusCode::OK, Json(state.card.clone())).into_response()
}

async fn rpc_handler(
    State(state): State<Arc<ServiceState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    if !state.ip_filter.is_allowed(addr.ip()) {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": "Access denied"})),
        )
            .into_response();
    }

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !state.auth.validate(auth_header) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "Unauthorized"})),
        )
            .into_response();
    }

    let envelope: JsonValue = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(_) => {
            return rpc_failure(&JsonValue::Null, -32700, "Parse error");
        }
    };
    let id = envelope.get("id").cloned().unwrap_or(JsonValue::Null);

    match envelope.get("method").and_then(|m| m.as_str()) {
        Some(m) if m == METHOD_MESSAGE_SEND => {}
        _ => return rpc_failure(&id, -32601, "Method not found"),
    }

    let message = match envelope.get("params").and_then(|p| p.get("message")) {
        Some(message) if message.is_object() => message,
        _ => return rpc_failure(&id, -32602, "Invalid params: missing message"),
    };

    let parts = match message.get("parts").and_then(|p| p.as_array()) {
        Some(parts) => parts,
        None => return rpc_failure(&id, -32602, "Invalid params: message has no parts"),
    };
    let user_text = parts
        .iter()
        .filter_map(Part::from_value)
        .filter_map(|part| match part {
            Part::Text { text } => Some(text),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    if user_text.trim().is_empty() {
        return rpc_failure(&id, -32602, "Invalid params: message has no text parts");
    }

    // A repeated contextId resumes its router session; a missing one gets a
    // fresh server-issued id.
    let context_id = message
        .get("contextId")
        .and_then(|c| c.as_str())
        .map(|c| c.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    match state.router.handle_message(&context_id, &user_text).await {
        Ok(reply_text) => {
            let reply =
                WireMessage::agent(vec![Part::text(reply_text)], Some(context_id));
            match serde_json::to_value(&reply) {
                Ok(value) => (StatusCode::OK, Json(rpc_response(&id, value))).into_response(),
                Err(e) => {
                    log::error!("failed to serialise reply message: {}", e);
                    rpc_failure(&id, -32603, "Internal error")
                }
            }
        }
        Err(e) => {
            log::error!("router failed for context {}: {}", context_id, e);
            rpc_failure(&id, -32603, &format!("Internal error: {}", e))
        }
    }
}

fn rpc_failure(id: &JsonValue, code: i64, message: &str) -> axum::response::Response {
    (StatusCode::OK, Json(rpc_error(id, code, message))).into_response()
}
