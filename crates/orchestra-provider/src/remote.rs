//! Remote HTTP providers
//!
//! Both the hosted router and the local daemon speak the same
//! OpenAI-compatible JSON contract (`POST /chat/completions`, `GET /models`);
//! they differ in credentials and cost. HTTP outcomes are mapped onto the
//! shared error taxonomy so the orchestrator can decide on retries:
//! - 401/403 and a missing API key: `Configuration`, never retried
//! - 429 and 5xx: `Inference`, retried
//! - connect failures: `Network`, retried
//! - client timeouts: `Timeout`, retried
//! - other 4xx: `Rejected`, not retried

use crate::counters::ProviderCounters;
use crate::provider::Provider;
use async_trait::async_trait;
use chrono::Utc;
use orchestra_core::{
    CompletionRequest, CompletionResponse, OrchestraError, ProviderCapabilities, ProviderKind,
    ProviderMetrics, ProviderStatus, RemoteProviderConfig, Result,
};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest error body excerpt kept in messages
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Provider speaking to a remote completion API
#[derive(Debug)]
pub struct RemoteProvider {
    kind: ProviderKind,
    config: RemoteProviderConfig,
    client: reqwest::Client,
    counters: ProviderCounters,
}

impl RemoteProvider {
    /// Hosted router; requests fail with `Configuration` until an API key is set
    ///
    /// # Errors
    /// - `OrchestraError::Configuration` if the HTTP client cannot be built
    pub fn router(config: RemoteProviderConfig) -> Result<Self> {
        Self::new(ProviderKind::Router, config)
    }

    /// Local inference daemon; no credentials required
    ///
    /// # Errors
    /// - `OrchestraError::Configuration` if the HTTP client cannot be built
    pub fn daemon(config: RemoteProviderConfig) -> Result<Self> {
        Self::new(ProviderKind::Daemon, config)
    }

    fn new(kind: ProviderKind, config: RemoteProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| OrchestraError::Configuration(format!("http client: {e}")))?;
        Ok(Self {
            kind,
            counters: ProviderCounters::new(config.id.clone()),
            config,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn api_key(&self) -> Result<Option<&str>> {
        let key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty());
        match (self.kind, key) {
            (ProviderKind::Router, None) => Err(OrchestraError::Configuration(format!(
                "provider {} requires an API key",
                self.config.id
            ))),
            (_, key) => Ok(key),
        }
    }

    fn authorize(&self, mut builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        if let Some(key) = self.api_key()? {
            builder = builder.bearer_auth(key);
        }
        if let Some(referer) = &self.config.referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(app) = &self.config.app_name {
            builder = builder.header("X-Title", app);
        }
        Ok(builder)
    }

    #[allow(clippy::cast_precision_loss)]
    fn estimate_cost(&self, tokens: u32) -> f64 {
        f64::from(tokens) / 1000.0 * self.config.cost_per_1k_tokens
    }

    async fn send(&self, model: &str, request: &CompletionRequest) -> Result<(String, u32, String)> {
        let body = ChatRequest {
            model,
            messages: [ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };
        let builder = self.authorize(self.client.post(self.url("chat/completions")))?;
        let response = builder
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(&e, self.config.timeout()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| OrchestraError::Inference(format!("malformed completion: {e}")))?;
        let text = parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or_else(|| OrchestraError::Inference("completion had no choices".to_string()))?;
        let tokens = parsed.usage.map_or(0, |u| u.total_tokens);
        let served_by = parsed.model.unwrap_or_else(|| model.to_string());
        Ok((text, tokens, served_by))
    }
}

#[async_trait]
impl Provider for RemoteProvider {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        self.config.enabled && self.api_key().is_ok()
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let builder = self.authorize(self.client.get(self.url("models")))?;
        let response = builder
            .send()
            .await
            .map_err(|e| map_transport_error(&e, self.config.timeout()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }
        let list: ModelList = response
            .json()
            .await
            .map_err(|e| OrchestraError::Inference(format!("malformed model list: {e}")))?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }

    async fn test_connection(&self) -> bool {
        match self.list_models().await {
            Ok(models) => {
                tracing::debug!("{} reachable, {} model(s)", self.config.id, models.len());
                true
            }
            Err(e) => {
                tracing::warn!("{} connection test failed: {}", self.config.id, e);
                false
            }
        }
    }

    async fn execute_completion(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());
        let tracker = self.counters.track(model.as_str());

        match self.send(&model, request).await {
            Ok((text, tokens, served_by)) => {
                let cost = self.estimate_cost(tokens);
                let elapsed = tracker.succeed(cost);
                Ok(CompletionResponse {
                    text,
                    tokens_used: tokens,
                    cost_estimate: cost,
                    latency_ms: millis(elapsed),
                    provider: self.config.id.clone(),
                    model: served_by,
                    cached: false,
                })
            }
            Err(e) => {
                tracing::warn!("{} completion failed: {}", self.config.id, e);
                tracker.fail();
                Err(e)
            }
        }
    }

    fn capabilities(&self) -> ProviderCapabilities {
        match self.kind {
            ProviderKind::Router => ProviderCapabilities {
                streaming: true,
                function_calling: true,
                vision: true,
                max_context: 128_000,
                formats: vec!["chat".to_string()],
            },
            _ => ProviderCapabilities {
                streaming: true,
                function_calling: false,
                vision: false,
                max_context: 8_192,
                formats: vec!["gguf".to_string()],
            },
        }
    }

    fn status(&self) -> ProviderStatus {
        let available = self.is_available();
        let message = match self.api_key() {
            Err(e) => e.to_string(),
            Ok(_) if !self.config.enabled => "disabled".to_string(),
            Ok(_) => format!(
                "{} requests, success rate {:.0}%",
                self.counters.total_requests(),
                self.counters.success_rate() * 100.0
            ),
        };
        ProviderStatus {
            available,
            healthy: self.counters.is_healthy(),
            message,
            last_request_at: self.counters.last_request_at(),
            avg_latency_ms: self.counters.avg_latency_ms(),
            checked_at: Utc::now(),
        }
    }

    fn metrics(&self) -> ProviderMetrics {
        self.counters.snapshot()
    }
}

/// Map an HTTP error status onto the error taxonomy
#[must_use]
pub fn classify_status(status: StatusCode, body: &str) -> OrchestraError {
    let excerpt: String = body.chars().take(MAX_ERROR_BODY).collect();
    let detail = format!("HTTP {}: {}", status.as_u16(), excerpt.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            OrchestraError::Configuration(format!("authentication failed, {detail}"))
        }
        StatusCode::TOO_MANY_REQUESTS => OrchestraError::Inference(format!("rate limited, {detail}")),
        s if s.is_server_error() => OrchestraError::Inference(format!("server error, {detail}")),
        _ => OrchestraError::Rejected(detail),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn map_transport_error(error: &reqwest::Error, timeout: Duration) -> OrchestraError {
    if error.is_timeout() {
        OrchestraError::Timeout {
            duration_ms: timeout.as_millis() as u64,
        }
    } else {
        OrchestraError::Network(error.to_string())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_core::ErrorKind;

    #[test]
    fn status_classification() {
        let kind = |code: u16| classify_status(StatusCode::from_u16(code).unwrap(), "x").kind();
        assert_eq!(kind(401), ErrorKind::Configuration);
        assert_eq!(kind(403), ErrorKind::Configuration);
        assert_eq!(kind(429), ErrorKind::Inference);
        assert_eq!(kind(500), ErrorKind::Inference);
        assert_eq!(kind(503), ErrorKind::Inference);
        assert_eq!(kind(400), ErrorKind::Rejected);
        assert_eq!(kind(404), ErrorKind::Rejected);
    }

    #[test]
    fn error_body_is_truncated() {
        let body = "y".repeat(1000);
        let msg = classify_status(StatusCode::BAD_REQUEST, &body).to_string();
        assert!(msg.len() < 300);
    }

    #[tokio::test]
    async fn router_without_key_fails_fast() {
        let provider = RemoteProvider::router(RemoteProviderConfig::router()).unwrap();
        assert!(!provider.is_available());

        let err = provider
            .execute_completion(&CompletionRequest::new("hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestraError::Configuration(_)));
        assert!(!err.is_retryable());
        assert_eq!(provider.metrics().failed_requests, 1);
        assert!(provider.status().message.contains("API key"));
    }

    #[test]
    fn daemon_needs_no_key() {
        let mut config = RemoteProviderConfig::daemon();
        config.enabled = true;
        let provider = RemoteProvider::daemon(config).unwrap();
        assert!(provider.is_available());
        assert_eq!(provider.kind(), ProviderKind::Daemon);
        assert_eq!(provider.url("models"), "http://localhost:11434/v1/models");
    }

    #[test]
    fn cost_estimate_uses_rate() {
        let mut config = RemoteProviderConfig::router();
        config.cost_per_1k_tokens = 2.0;
        let provider = RemoteProvider::router(config).unwrap();
        assert!((provider.estimate_cost(500) - 1.0).abs() < f64::EPSILON);
    }
}
