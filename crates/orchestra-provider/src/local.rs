//! Local model provider
//!
//! Serves completions from models held by a [`ModelRegistry`]. The target
//! model is resolved from the request (explicit name or id, else the first
//! registered text-generation model) and loaded implicitly on first use.

use crate::counters::ProviderCounters;
use crate::provider::Provider;
use async_trait::async_trait;
use chrono::Utc;
use orchestra_core::{
    Capability, CompletionRequest, CompletionResponse, ModelDescriptor, OrchestraError,
    ProviderCapabilities, ProviderKind, ProviderMetrics, ProviderStatus, Result,
};
use orchestra_models::{InferenceExecutor, ModelHandle, ModelRegistry};
use std::sync::Arc;
use std::time::Duration;

/// Context window reported for local models
const LOCAL_MAX_CONTEXT: u32 = 2048;

/// Counter key for requests that never resolved a model
const UNRESOLVED_MODEL: &str = "<unresolved>";

/// Provider backed by the local model registry
#[derive(Debug)]
pub struct LocalModelProvider {
    id: String,
    registry: Arc<ModelRegistry>,
    executor: InferenceExecutor,
    counters: ProviderCounters,
}

impl LocalModelProvider {
    /// Create provider over a shared registry
    #[must_use]
    pub fn new(id: impl Into<String>, registry: Arc<ModelRegistry>) -> Self {
        let id = id.into();
        Self {
            counters: ProviderCounters::new(id.clone()),
            id,
            registry,
            executor: InferenceExecutor::new(),
        }
    }

    /// Registry this provider serves from
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    fn resolve(&self, request: &CompletionRequest) -> Result<ModelDescriptor> {
        match request.model.as_deref() {
            Some(name) => self
                .registry
                .resolve(name)
                .ok_or_else(|| OrchestraError::model_not_found(name)),
            None => self
                .registry
                .first_capable(Capability::TextGeneration)
                .ok_or_else(|| {
                    OrchestraError::NotFound("no text-generation model registered".to_string())
                }),
        }
    }

    async fn acquire(&self, descriptor: &ModelDescriptor) -> Result<ModelHandle> {
        if let Some(handle) = self.registry.handle(&descriptor.id) {
            return Ok(handle);
        }
        tracing::info!("Local provider loading {} on demand", descriptor.id);
        self.registry.load(&descriptor.id).await
    }

    async fn run(&self, descriptor: &ModelDescriptor, request: &CompletionRequest) -> Result<CompletionResponse> {
        let handle = self.acquire(descriptor).await?;
        let completion = self
            .executor
            .complete(&handle, &request.prompt, request.max_tokens, request.temperature)
            .await?;
        Ok(CompletionResponse {
            text: completion.text,
            tokens_used: completion.tokens_used,
            cost_estimate: 0.0,
            latency_ms: 0,
            provider: self.id.clone(),
            model: descriptor.id.to_string(),
            cached: false,
        })
    }
}

#[async_trait]
impl Provider for LocalModelProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn is_available(&self) -> bool {
        self.registry
            .first_capable(Capability::TextGeneration)
            .is_some()
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(self
            .registry
            .list_available()
            .into_iter()
            .map(|d| d.id.to_string())
            .collect())
    }

    async fn test_connection(&self) -> bool {
        self.is_available()
    }

    async fn execute_completion(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let mut tracker = self
            .counters
            .track(request.model.as_deref().unwrap_or(UNRESOLVED_MODEL));

        let descriptor = match self.resolve(request) {
            Ok(d) => d,
            Err(e) => {
                tracker.fail();
                return Err(e);
            }
        };
        tracker.set_model(descriptor.id.as_str());

        match self.run(&descriptor, request).await {
            Ok(mut response) => {
                response.latency_ms = millis(tracker.succeed(0.0));
                Ok(response)
            }
            Err(e) => {
                tracing::warn!("Local completion on {} failed: {}", descriptor.id, e);
                tracker.fail();
                Err(e)
            }
        }
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: false,
            function_calling: false,
            vision: false,
            max_context: LOCAL_MAX_CONTEXT,
            formats: vec!["onnx".to_string()],
        }
    }

    fn status(&self) -> ProviderStatus {
        let registered = self.registry.list_available().len();
        let stats = self.registry.memory_stats();
        let idle = self.counters.total_requests() == 0;
        let healthy = idle || (self.counters.is_healthy() && stats.loaded_count > 0);

        ProviderStatus {
            available: self.is_available(),
            healthy,
            message: format!(
                "{registered} model(s) registered, {} loaded, memory {:.1}%",
                stats.loaded_count,
                stats.usage_percent()
            ),
            last_request_at: self.counters.last_request_at(),
            avg_latency_ms: self.counters.avg_latency_ms(),
            checked_at: Utc::now(),
        }
    }

    fn metrics(&self) -> ProviderMetrics {
        self.counters.snapshot()
    }
}

#[allow(clippy::cast_possible_truncation)]
fn millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_core::ModelMetadata;
    use orchestra_models::ReferenceLoader;

    fn provider_with(models: &[(&str, ModelMetadata)]) -> (tempfile::TempDir, LocalModelProvider) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(ModelRegistry::new(
            Arc::new(ReferenceLoader::default()),
            10_000,
        ));
        for (name, meta) in models {
            let path = dir.path().join(format!("{name}.onnx"));
            std::fs::write(&path, name.as_bytes()).unwrap();
            registry
                .register_with_metadata(name, &path, meta.clone())
                .unwrap();
        }
        (dir, LocalModelProvider::new("local", registry))
    }

    #[tokio::test]
    async fn implicit_load_and_metrics() {
        let (_dir, provider) = provider_with(&[
            ("embedder", ModelMetadata::embeddings(100)),
            ("writer", ModelMetadata::text_generation(100)),
        ]);
        let request = CompletionRequest::new("describe the endpoint")
            .with_max_tokens(8)
            .with_temperature(0.0);

        let response = provider.execute_completion(&request).await.unwrap();

        assert_eq!(response.model, "writer");
        assert_eq!(response.provider, "local");
        assert!(response.tokens_used > 0);
        assert!(!response.cached);
        assert_eq!(provider.registry().memory_stats().loaded_count, 1);

        let metrics = provider.metrics();
        assert_eq!(metrics.successful_requests, 1);
        assert_eq!(metrics.per_model.get("writer").unwrap().successes, 1);
        assert!(provider.status().healthy);
    }

    #[tokio::test]
    async fn unknown_model_counts_as_failure() {
        let (_dir, provider) = provider_with(&[("writer", ModelMetadata::text_generation(1))]);
        let request = CompletionRequest::new("x").with_model("ghost");

        let err = provider.execute_completion(&request).await.unwrap_err();

        assert!(matches!(err, OrchestraError::NotFound(_)));
        let metrics = provider.metrics();
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.per_model.get("ghost").unwrap().failures, 1);
    }

    #[tokio::test]
    async fn embeddings_only_model_is_unsupported() {
        let (_dir, provider) = provider_with(&[("embedder", ModelMetadata::embeddings(1))]);
        assert!(!provider.is_available());

        let request = CompletionRequest::new("x").with_model("embedder");
        let err = provider.execute_completion(&request).await.unwrap_err();
        assert!(matches!(err, OrchestraError::CapabilityUnsupported { .. }));
        assert_eq!(provider.metrics().per_model.get("embedder").unwrap().failures, 1);
    }

    #[tokio::test]
    async fn unhealthy_without_loaded_models() {
        let (_dir, provider) = provider_with(&[("writer", ModelMetadata::text_generation(1))]);
        let request = CompletionRequest::new("x").with_temperature(0.0);
        provider.execute_completion(&request).await.unwrap();
        assert!(provider.status().healthy);

        provider.registry().shutdown_all().await;
        assert!(!provider.status().healthy);
        assert!(provider.status().available);
    }

    #[tokio::test]
    async fn list_models_and_capabilities() {
        let (_dir, provider) = provider_with(&[
            ("a", ModelMetadata::text_generation(1)),
            ("b", ModelMetadata::embeddings(1)),
        ]);
        assert_eq!(provider.list_models().await.unwrap(), vec!["a", "b"]);
        assert!(provider.test_connection().await);
        assert_eq!(provider.kind(), ProviderKind::Local);
        assert!(!provider.capabilities().streaming);
    }
}
