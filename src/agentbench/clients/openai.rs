//! OpenAI-compatible chat gateway client.
//!
//! Posts to `{base_url}/chat/completions` with a bearer key. Works against
//! OpenAI itself and the many gateways that mirror its surface; the base
//! URL and model identifier are deployment configuration.

use crate::agentbench::client_wrapper::{ClientWrapper, Message, Role, TokenUsage};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// [`ClientWrapper`] for any OpenAI-compatible `/chat/completions` endpoint.
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    usage: Mutex<Option<TokenUsage>>,
}

impl GatewayClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self::new_with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    /// Point the client at a non-default gateway (proxy, self-hosted, etc.).
    pub fn new_with_base_url(api_key: &str, model: &str, base_url: &str) -> Self {
        GatewayClient {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("failed to build HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            usage: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ClientWrapper for GatewayClient {
    async fn send_message(
        &self,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let wire_messages: Vec<JsonValue> = messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                serde_json::json!({"role": role, "content": msg.content.as_ref()})
            })
            .collect();

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "messages": wire_messages,
            }))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            log::error!("GatewayClient::send_message: HTTP {} from {}", status, url);
            return Err(format!("chat gateway returned HTTP {}", status).into());
        }

        let parsed: JsonValue = serde_json::from_str(&text)?;

        if let Some(usage_obj) = parsed.get("usage") {
            let input = usage_obj
                .get("prompt_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize;
            let output = usage_obj
                .get("completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize;
            *self.usage.lock().await = Some(TokenUsage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: input + output,
            });
        }

        let content = parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or("chat gateway reply has no choices[0].message.content")?;

        Ok(Message {
            role: Role::Assistant,
            content: Arc::from(content),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalised() {
        let client = GatewayClient::new_with_base_url("k", "gpt-4.1-mini", "http://gw:9000/v1/");
        assert_eq!(client.base_url, "http://gw:9000/v1");
        assert_eq!(client.model_name(), "gpt-4.1-mini");
    }
}
