//! Reasoning oracle client.
//!
//! Thin wrapper around an OpenRouter-style chat-completions endpoint. The
//! contract is deliberately failure-tolerant: `ask` returns `None` on any
//! error (network, non-2xx, malformed body) and never retries; callers drop
//! the affected agent from the round.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::Config;

#[derive(Debug, Clone, Serialize)]
pub struct OracleMessage {
    pub role: String,
    pub content: String,
}

impl OracleMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Provider routing hint; when set, pins the request to a fixed provider
/// order for determinism-oriented calls.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHint {
    pub order: Vec<String>,
    pub allow_fallbacks: bool,
}

#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    /// Returns the assistant text of the first choice, or `None` on any
    /// failure. `model` falls back to the configured default when absent.
    async fn ask(
        &self,
        messages: &[OracleMessage],
        model: Option<&str>,
        provider: Option<&ProviderHint>,
    ) -> Option<String>;
}

#[derive(Clone)]
pub struct OpenRouterOracle {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
    referer: Option<String>,
    title: Option<String>,
}

impl OpenRouterOracle {
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        let referer = std::env::var("ORACLE_HTTP_REFERER")
            .ok()
            .filter(|s| !s.trim().is_empty());
        let title = std::env::var("ORACLE_APP_TITLE")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Self {
            http,
            api_key: config.oracle_api_key.clone(),
            base_url: config.oracle_base_url.trim_end_matches('/').to_string(),
            default_model: config.oracle_model.clone(),
            referer,
            title,
        }
    }

    async fn ask_inner(
        &self,
        messages: &[OracleMessage],
        model: Option<&str>,
        provider: Option<&ProviderHint>,
    ) -> anyhow::Result<String> {
        let req = ChatCompletionRequest {
            model: model.unwrap_or(&self.default_model).to_string(),
            messages: messages.to_vec(),
            provider: provider.cloned(),
        };

        let mut http_req = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(r) = &self.referer {
            http_req = http_req.header("HTTP-Referer", r);
        }
        if let Some(t) = &self.title {
            http_req = http_req.header("X-Title", t);
        }

        let resp = http_req.json(&req).send().await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let snippet: String = body.chars().take(800).collect();
            anyhow::bail!("oracle {}: {}", status.as_u16(), snippet);
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .map(|m| m.content)
            .ok_or_else(|| anyhow::anyhow!("oracle reply had no choices"))
    }
}

#[async_trait]
impl ReasoningOracle for OpenRouterOracle {
    async fn ask(
        &self,
        messages: &[OracleMessage],
        model: Option<&str>,
        provider: Option<&ProviderHint>,
    ) -> Option<String> {
        match self.ask_inner(messages, model, provider).await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("oracle call failed: {e:#}");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<OracleMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<ProviderHint>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageOut>,
}

#[derive(Debug, Deserialize)]
struct ChatMessageOut {
    content: String,
}
