//! HTTP client for the Agent Protocol.
//!
//! Two operations: [`discover_agent`] fetches and validates the agent card,
//! [`send_message`] performs one `message/send` round-trip. Both are the
//! only I/O-suspending points in the core.
//!
//! A fresh [`reqwest::Client`] is built per call and dropped before the
//! call returns. The evaluator adapter may run consecutive calls on
//! different runtimes (see the scheduler bridge there), and a pooled client
//! created on a throwaway runtime would hold connections bound to a dead
//! driver.
//!
//! Every exchange appends a [`RequestMetric`] and emits exactly one INFO
//! log line. The bearer token never appears in logs, errors, or `Debug`
//! output.

use crate::agentbench::metrics::{MetricsRecorder, RequestMetric};
use crate::agentbench::wire::{
    parse_rpc_reply, rpc_request, AgentCard, WireError, WireMessage, AGENT_CARD_PATH,
    METHOD_MESSAGE_SEND,
};
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::error::Error;
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Connection settings for one remote agent.
///
/// Immutable after construction; shared read-only by every task that talks
/// to the same endpoint.
#[derive(Clone)]
pub struct ClientConfig {
    endpoint: String,
    auth_token: Option<String>,
    timeout: Duration,
    verify_ssl: bool,
}

impl ClientConfig {
    /// Validate and normalise the endpoint: must be absolute http(s), any
    /// trailing slash is stripped.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, String> {
        let endpoint = endpoint.into();
        let trimmed = endpoint.trim();
        if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
            return Err(format!(
                "endpoint must begin with http:// or https://, got: {}",
                trimmed
            ));
        }
        Ok(ClientConfig {
            endpoint: trimmed.trim_end_matches('/').to_string(),
            auth_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            verify_ssl: true,
        })
    }

    /// Attach a bearer token sent as `Authorization: Bearer <token>`.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Override the total read timeout (must be positive).
    pub fn with_timeout_secs(mut self, secs: u64) -> Result<Self, String> {
        if secs == 0 {
            return Err("timeout_seconds must be greater than zero".to_string());
        }
        self.timeout = Duration::from_secs(secs);
        Ok(self)
    }

    /// Disable TLS certificate verification (self-signed test deployments).
    pub fn with_verify_ssl(mut self, verify: bool) -> Self {
        self.verify_ssl = verify;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn verify_ssl(&self) -> bool {
        self.verify_ssl
    }

    pub(crate) fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "***redacted***"),
            )
            .field("timeout", &self.timeout)
            .field("verify_ssl", &self.verify_ssl)
            .finish()
    }
}

/// Failures while fetching or validating the agent card.
#[derive(Debug, Clone)]
pub enum DiscoveryError {
    /// Connection refused, DNS failure, or the read deadline expired.
    Unreachable(String),
    /// The endpoint answered with a non-2xx status.
    HttpStatus(u16),
    /// The card failed to parse or validate.
    Malformed(String),
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryError::Unreachable(detail) => {
                write!(f, "agent card endpoint unreachable: {}", detail)
            }
            DiscoveryError::HttpStatus(code) => {
                write!(f, "agent card request returned HTTP {}", code)
            }
            DiscoveryError::Malformed(detail) => write!(f, "malformed agent card: {}", detail),
        }
    }
}

impl Error for DiscoveryError {}

/// Failures of a `message/send` exchange.
///
/// None of the variants carries the auth token, so any of these can be
/// logged or surfaced verbatim.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    /// The configured read deadline expired.
    Timeout,
    /// Connection refused or DNS failure.
    Unreachable(String),
    /// HTTP 401 or 403.
    Unauthorized,
    /// Any other non-2xx status.
    BadStatus(u16),
    /// JSON parse failure, missing `result`, or an unrecognised reply shape.
    Malformed(String),
    /// The JSON-RPC `error` member was populated.
    RpcError { code: i64, message: String },
}

impl ProtocolError {
    /// Short slug recorded in the metric's `error` field.
    pub fn metric_label(&self) -> &'static str {
        match self {
            ProtocolError::Timeout => "timeout",
            ProtocolError::Unreachable(_) => "unreachable",
            ProtocolError::Unauthorized => "unauthorized",
            ProtocolError::BadStatus(_) => "bad_status",
            ProtocolError::Malformed(_) => "malformed",
            ProtocolError::RpcError { .. } => "rpc_error",
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Timeout => write!(f, "request timed out"),
            ProtocolError::Unreachable(detail) => write!(f, "endpoint unreachable: {}", detail),
            ProtocolError::Unauthorized => write!(f, "authentication rejected by the agent"),
            ProtocolError::BadStatus(code) => write!(f, "agent returned HTTP {}", code),
            ProtocolError::Malformed(detail) => write!(f, "malformed agent reply: {}", detail),
            ProtocolError::RpcError { code, message } => {
                write!(f, "agent returned JSON-RPC error {}: {}", code, message)
            }
        }
    }
}

impl Error for ProtocolError {}

/// The result of a successful [`send_message`] call.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message: WireMessage,
    /// Server-issued conversation id to echo on the next message.
    pub context_id: Option<String>,
    pub metric: RequestMetric,
}

fn fresh_client(config: &ClientConfig) -> reqwest::Client {
    let mut builder = reqwest::Client::builder().timeout(config.timeout());
    if !config.verify_ssl() {
        builder = builder.danger_accept_invalid_certs(true);
    }
    // The builder only fails on TLS backend misconfiguration, which is a
    // deployment defect rather than a per-request condition.
    builder.build().expect("failed to build HTTP client")
}

/// Fetch `<endpoint>/.well-known/agent-card.json` and validate the card.
pub async fn discover_agent(config: &ClientConfig) -> Result<AgentCard, DiscoveryError> {
    let url = format!("{}{}", config.endpoint(), AGENT_CARD_PATH);
    let client = fresh_client(config);

    let mut request = client.get(&url);
    if let Some(token) = config.auth_token() {
        request = request.header("Authorization", format!("Bearer {}", token));
    }

    let response = request
        .send()
        .await
        .map_err(|e| DiscoveryError::Unreachable(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DiscoveryError::HttpStatus(status.as_u16()));
    }

    let card: AgentCard = response
        .json()
        .await
        .map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
    card.validate().map_err(DiscoveryError::Malformed)?;

    log::info!(
        "agent discovery endpoint={} name={} version={}",
        config.endpoint(),
        card.name,
        card.version.as_deref().unwrap_or("unknown")
    );

    Ok(card)
}

/// Perform one `message/send` round-trip.
///
/// On success returns the normalised reply; on failure returns the
/// classified [`ProtocolError`]. Either way, a [`RequestMetric`] is
/// appended to `metrics` and one INFO line is emitted.
pub async fn send_message(
    config: &ClientConfig,
    message: &WireMessage,
    metrics: &MetricsRecorder,
) -> Result<SendOutcome, ProtocolError> {
    let request_id = Uuid::new_v4().to_string();
    let envelope = rpc_request(
        &request_id,
        METHOD_MESSAGE_SEND,
        serde_json::json!({ "message": message }),
    );

    let client = fresh_client(config);
    let start = Instant::now();
    let exchange = perform_send(config, &client, &envelope).await;
    let latency_ms = start.elapsed().as_millis() as u64;
    drop(client);

    match exchange {
        Ok((status_code, reply_message, context_id)) => {
            let (input_tokens, output_tokens) = token_usage_of(&reply_message);
            let metric = RequestMetric {
                request_id,
                endpoint: config.endpoint().to_string(),
                method: METHOD_MESSAGE_SEND.to_string(),
                status_code: Some(status_code),
                latency_ms,
                input_tokens,
                output_tokens,
                context_id: context_id.clone(),
                error: None,
                timestamp: Utc::now(),
            };
            metrics.record(metric.clone());
            log::info!(
                "message/send endpoint={} status={} latency_ms={} context_id={}",
                config.endpoint(),
                status_code,
                latency_ms,
                context_id.as_deref().unwrap_or("-")
            );
            Ok(SendOutcome {
                message: reply_message,
                context_id,
                metric,
            })
        }
        Err((status_code, error)) => {
            metrics.record(RequestMetric {
                request_id,
                endpoint: config.endpoint().to_string(),
                method: METHOD_MESSAGE_SEND.to_string(),
                status_code,
                latency_ms,
                input_tokens: None,
                output_tokens: None,
                context_id: None,
                error: Some(error.metric_label().to_string()),
                timestamp: Utc::now(),
            });
            log::info!(
                "message/send endpoint={} status={} latency_ms={} context_id=-",
                config.endpoint(),
                error.metric_label(),
                latency_ms
            );
            Err(error)
        }
    }
}

type Exchange = Result<(u16, WireMessage, Option<String>), (Option<u16>, ProtocolError)>;

async fn perform_send(
    config: &ClientConfig,
    client: &reqwest::Client,
    envelope: &JsonValue,
) -> Exchange {
    let mut request = client.post(config.endpoint()).json(envelope);
    if let Some(token) = config.auth_token() {
        request = request.header("Authorization", format!("Bearer {}", token));
    }

    let response = request
        .send()
        .await
        .map_err(|e| (None, classify_transport_error(&e)))?;

    let status = response.status().as_u16();
    if status == 401 || status == 403 {
        return Err((Some(status), ProtocolError::Unauthorized));
    }
    if !(200..300).contains(&status) {
        return Err((Some(status), ProtocolError::BadStatus(status)));
    }

    let body: JsonValue = response
        .json()
        .await
        .map_err(|e| (Some(status), classify_body_error(&e)))?;

    let reply = parse_rpc_reply(&body).map_err(|e| {
        let mapped = match e {
            WireError::Rpc { code, message } => ProtocolError::RpcError { code, message },
            other => {
                log::warn!(
                    "unparseable agent reply (truncated): {}",
                    truncate(&body.to_string(), 512)
                );
                ProtocolError::Malformed(other.to_string())
            }
        };
        (Some(status), mapped)
    })?;

    Ok((status, reply.message, reply.context_id))
}

fn classify_transport_error(error: &reqwest::Error) -> ProtocolError {
    if error.is_timeout() {
        ProtocolError::Timeout
    } else {
        // Connection refused, DNS failure, TLS handshake, broken pipe.
        ProtocolError::Unreachable(error.to_string())
    }
}

fn classify_body_error(error: &reqwest::Error) -> ProtocolError {
    if error.is_timeout() {
        ProtocolError::Timeout
    } else {
        ProtocolError::Malformed(error.to_string())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

/// Pull optional token counts out of `metadata.usage` when the agent
/// reports them; there is no local tokeniser fallback.
fn token_usage_of(message: &WireMessage) -> (Option<u64>, Option<u64>) {
    let usage = match message.metadata.as_ref().and_then(|m| m.get("usage")) {
        Some(u) => u,
        None => return (None, None),
    };
    (
        usage.get("inputTokens").and_then(|v| v.as_u64()),
        usage.get("outputTokens").and_then(|v| v.as_u64()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_is_normalised() {
        let config = ClientConfig::new("http://localhost:9999/").unwrap();
        assert_eq!(config.endpoint(), "http://localhost:9999");

        let config = ClientConfig::new("https://agent.example.com/api///").unwrap();
        assert_eq!(config.endpoint(), "https://agent.example.com/api");
    }

    #[test]
    fn test_endpoint_scheme_is_required() {
        assert!(ClientConfig::new("localhost:9999").is_err());
        assert!(ClientConfig::new("ftp://agent").is_err());
    }

    #[test]
    fn test_timeout_must_be_positive() {
        let config = ClientConfig::new("http://x").unwrap();
        assert!(config.clone().with_timeout_secs(0).is_err());
        let config = config.with_timeout_secs(5).unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_default_timeout_is_300s() {
        let config = ClientConfig::new("http://x").unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(300));
        assert!(config.verify_ssl());
    }

    #[test]
    fn test_debug_redacts_the_token() {
        let config = ClientConfig::new("http://x")
            .unwrap()
            .with_auth_token("SECRET-XYZ");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("SECRET-XYZ"));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn test_metric_labels() {
        assert_eq!(ProtocolError::Timeout.metric_label(), "timeout");
        assert_eq!(ProtocolError::Unauthorized.metric_label(), "unauthorized");
        assert_eq!(ProtocolError::BadStatus(500).metric_label(), "bad_status");
        assert_eq!(
            ProtocolError::RpcError {
                code: -32000,
                message: "x".to_string()
            }
            .metric_label(),
            "rpc_error"
        );
    }

    #[test]
    fn test_error_display_never_holds_a_token() {
        // The variants structurally cannot carry the token; this pins the
        // rendered forms.
        assert_eq!(ProtocolError::Timeout.to_string(), "request timed out");
        assert_eq!(
            ProtocolError::Unauthorized.to_string(),
            "authentication rejected by the agent"
        );
    }
}
