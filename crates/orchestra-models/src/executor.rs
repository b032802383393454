//! Inference executor
//!
//! Stateless beyond the handle it is given: checks the declared capability,
//! marks the handle as used, and runs the native call on the blocking pool.

use crate::handle::ModelHandle;
use crate::loader::GenerationParams;
use metrics::histogram;
use orchestra_core::{Capability, OrchestraError, Result};
use std::time::{Duration, Instant};

/// Output of one completion call
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tokens_used: u32,
    pub latency: Duration,
}

/// Runs completion and embedding requests against loaded handles
#[derive(Debug, Clone, Copy, Default)]
pub struct InferenceExecutor;

impl InferenceExecutor {
    /// Create executor
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Generate text for one prompt
    ///
    /// # Errors
    /// - `OrchestraError::CapabilityUnsupported` if the model cannot generate text
    /// - `OrchestraError::Inference` on native runtime failure
    pub async fn complete(
        &self,
        handle: &ModelHandle,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Completion> {
        Self::require(handle, Capability::TextGeneration)?;
        handle.touch();

        let session = handle.session();
        let prompt = prompt.to_string();
        let params = GenerationParams {
            max_tokens,
            temperature,
        };
        let started = Instant::now();
        let native = tokio::task::spawn_blocking(move || session.generate(&prompt, &params))
            .await
            .map_err(|e| OrchestraError::Inference(format!("inference task failed: {e}")))??;
        let latency = started.elapsed();

        histogram!("orchestra_inference_latency_ms", "model" => handle.model_id().to_string())
            .record(latency.as_secs_f64() * 1000.0);
        tracing::debug!(
            "Model {} generated {} tokens in {:?}",
            handle.model_id(),
            native.tokens_used,
            latency
        );

        Ok(Completion {
            text: native.text,
            tokens_used: native.tokens_used,
            latency,
        })
    }

    /// Embed one text
    ///
    /// # Errors
    /// - `OrchestraError::CapabilityUnsupported` if the model cannot embed
    /// - `OrchestraError::Inference` on native runtime failure
    pub async fn embed(&self, handle: &ModelHandle, text: &str) -> Result<Vec<f32>> {
        Self::require(handle, Capability::Embeddings)?;
        handle.touch();

        let session = handle.session();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || session.embed(&text))
            .await
            .map_err(|e| OrchestraError::Inference(format!("embedding task failed: {e}")))?
    }

    /// Run prompts sequentially against one handle
    ///
    /// Each item carries its own result; a failure does not stop later items.
    pub async fn complete_batch(
        &self,
        handle: &ModelHandle,
        prompts: &[String],
        max_tokens: u32,
        temperature: f32,
    ) -> Vec<Result<Completion>> {
        let mut results = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            results.push(self.complete(handle, prompt, max_tokens, temperature).await);
        }
        let failed = results.iter().filter(|r| r.is_err()).count();
        tracing::debug!(
            "Batch of {} on {} finished with {} failure(s)",
            prompts.len(),
            handle.model_id(),
            failed
        );
        results
    }

    fn require(handle: &ModelHandle, capability: Capability) -> Result<()> {
        if handle.descriptor().supports(capability) {
            Ok(())
        } else {
            Err(OrchestraError::CapabilityUnsupported {
                model: handle.model_id().to_string(),
                capability,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{LoadedSession, ModelLoader, NativeCompletion, NativeSession};
    use crate::registry::ModelRegistry;
    use orchestra_core::{ModelDescriptor, ModelMetadata};
    use std::path::Path;
    use std::sync::Arc;

    /// Fails every prompt containing "boom"
    #[derive(Debug)]
    struct PickySession;

    impl NativeSession for PickySession {
        fn generate(&self, prompt: &str, p: &GenerationParams) -> Result<NativeCompletion> {
            if prompt.contains("boom") {
                return Err(OrchestraError::Inference("kernel fault".to_string()));
            }
            Ok(NativeCompletion {
                text: prompt.to_uppercase(),
                tokens_used: p.max_tokens,
            })
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            #[allow(clippy::cast_precision_loss)]
            Ok(vec![text.len() as f32])
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct PickyLoader;

    impl ModelLoader for PickyLoader {
        fn inspect(&self, path: &Path) -> Result<ModelMetadata> {
            let name = path.file_name().unwrap().to_string_lossy();
            Ok(if name.contains("embed") {
                ModelMetadata::embeddings(10)
            } else {
                ModelMetadata::text_generation(10)
            })
        }

        fn load(&self, d: &ModelDescriptor) -> Result<LoadedSession> {
            Ok(LoadedSession {
                session: Box::new(PickySession),
                resident_bytes: d.size_bytes,
            })
        }
    }

    async fn loaded(file: &str) -> (tempfile::TempDir, ModelRegistry, ModelHandle) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(file);
        std::fs::write(&path, b"w").unwrap();
        let registry = ModelRegistry::new(Arc::new(PickyLoader), 1000);
        let id = registry.register(file, &path).unwrap().id;
        let handle = registry.load(&id).await.unwrap();
        (dir, registry, handle)
    }

    #[tokio::test]
    async fn complete_returns_text_and_touches() {
        let (_dir, _registry, handle) = loaded("gen.onnx").await;
        let before = handle.last_used_tick();

        let out = InferenceExecutor::new()
            .complete(&handle, "hello", 4, 0.0)
            .await
            .unwrap();

        assert_eq!(out.text, "HELLO");
        assert_eq!(out.tokens_used, 4);
        assert!(handle.last_used_tick() > before);
    }

    #[tokio::test]
    async fn capability_is_checked() {
        let (_dir, _registry, handle) = loaded("embed.onnx").await;
        let exec = InferenceExecutor::new();

        let err = exec.complete(&handle, "hi", 4, 0.0).await.unwrap_err();
        assert!(matches!(err, OrchestraError::CapabilityUnsupported { .. }));
        assert!(!err.is_retryable());
        assert_eq!(exec.embed(&handle, "four").await.unwrap(), vec![4.0]);

        let (_dir2, _registry2, text_model) = loaded("gen.onnx").await;
        assert!(matches!(
            exec.embed(&text_model, "x").await,
            Err(OrchestraError::CapabilityUnsupported { .. })
        ));
    }

    #[tokio::test]
    async fn batch_keeps_partial_results() {
        let (_dir, _registry, handle) = loaded("gen.onnx").await;
        let prompts = vec!["one".to_string(), "boom".to_string(), "three".to_string()];

        let results = InferenceExecutor::new()
            .complete_batch(&handle, &prompts, 2, 0.0)
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().text, "ONE");
        assert!(matches!(results[1], Err(OrchestraError::Inference(_))));
        assert_eq!(results[2].as_ref().unwrap().text, "THREE");
    }

    #[tokio::test]
    async fn unloaded_handle_fails_with_reference_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.onnx");
        std::fs::write(&path, b"weights").unwrap();
        let registry = ModelRegistry::new(Arc::new(crate::ReferenceLoader::default()), 1000);
        let id = registry.register("m", &path).unwrap().id;
        let handle = registry.load(&id).await.unwrap();
        registry.unload(&id).await.unwrap();

        let err = InferenceExecutor::new()
            .complete(&handle, "late", 4, 0.0)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
