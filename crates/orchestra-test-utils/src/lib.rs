//! Testing utilities for the Orchestra workspace
//!
//! Shared providers, loaders and fixtures for integration tests.

#![allow(missing_docs)]

use async_trait::async_trait;
use chrono::Utc;
use orchestra_core::{
    CompletionRequest, CompletionResponse, ErrorKind, ModelDescriptor, ModelMetadata,
    OrchestraError, ProviderCapabilities, ProviderKind, ProviderMetrics, ProviderStatus, Result,
};
use orchestra_models::{
    GenerationParams, LoadedSession, ModelLoader, ModelRegistry, NativeCompletion, NativeSession,
    ReferenceLoader,
};
use orchestra_provider::{Provider, ProviderCounters, RequestTracker};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// One scripted provider outcome
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Succeed with this text
    Reply(String),
    /// Fail with an error of this kind
    Fail(ErrorKind),
    /// Sleep, then succeed
    Stall(Duration),
}

/// Build an error of the given kind with a fixed message
pub fn error_of(kind: ErrorKind) -> OrchestraError {
    let msg = || format!("scripted {kind}");
    match kind {
        ErrorKind::NotFound => OrchestraError::NotFound(msg()),
        ErrorKind::AlreadyRegistered => OrchestraError::AlreadyRegistered(msg()),
        ErrorKind::Busy => OrchestraError::Busy {
            id: "scripted".to_string(),
            status: orchestra_core::ModelStatus::Loading,
        },
        ErrorKind::CapabilityUnsupported => OrchestraError::CapabilityUnsupported {
            model: "scripted".to_string(),
            capability: orchestra_core::Capability::TextGeneration,
        },
        ErrorKind::Configuration => OrchestraError::Configuration(msg()),
        ErrorKind::Inference => OrchestraError::Inference(msg()),
        ErrorKind::Network => OrchestraError::Network(msg()),
        ErrorKind::Timeout => OrchestraError::Timeout { duration_ms: 1 },
        ErrorKind::Rejected => OrchestraError::Rejected(msg()),
        ErrorKind::CircuitOpen => OrchestraError::CircuitOpen {
            provider: "scripted".to_string(),
            retry_in_ms: 1,
        },
        ErrorKind::DeadlineExceeded => OrchestraError::DeadlineExceeded { elapsed_ms: 1 },
        ErrorKind::NoProvidersAvailable => OrchestraError::NoProvidersAvailable,
        ErrorKind::AllProvidersFailed => OrchestraError::AllProvidersFailed {
            failures: Vec::new(),
        },
        ErrorKind::Io => OrchestraError::Io(std::io::Error::other(msg())),
    }
}

/// Provider replaying a script of outcomes, then repeating a fallback step
#[derive(Debug)]
pub struct ScriptedProvider {
    id: String,
    kind: ProviderKind,
    available: AtomicBool,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
    counters: ProviderCounters,
}

impl ScriptedProvider {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: ProviderKind::Router,
            available: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            fallback: Step::Reply(format!("reply from {id}")),
            calls: AtomicUsize::new(0),
            counters: ProviderCounters::new(id),
        }
    }

    /// Provider that fails every call with `kind`
    pub fn failing(id: &str, kind: ErrorKind) -> Self {
        Self::new(id).always(Step::Fail(kind))
    }

    #[must_use]
    pub fn with_script(self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.script.lock().extend(steps);
        self
    }

    #[must_use]
    pub fn always(mut self, step: Step) -> Self {
        self.fallback = step;
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn unavailable(self) -> Self {
        self.set_available(false);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of `execute_completion` invocations so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn respond(&self, request: &CompletionRequest, text: String, tracker: RequestTracker<'_>) -> CompletionResponse {
        let model = request.model.clone().unwrap_or_else(|| "scripted".to_string());
        let tokens = u32::try_from(request.prompt.split_whitespace().count()).unwrap_or(u32::MAX);
        tracker.succeed(0.0);
        CompletionResponse {
            text,
            tokens_used: tokens,
            cost_estimate: 0.0,
            latency_ms: 0,
            provider: self.id.clone(),
            model,
            cached: false,
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec!["scripted".to_string()])
    }

    async fn test_connection(&self) -> bool {
        self.is_available()
    }

    async fn execute_completion(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tracker = self
            .counters
            .track(request.model.as_deref().unwrap_or("scripted"));
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Reply(text) => Ok(self.respond(request, text, tracker)),
            Step::Fail(kind) => {
                tracker.fail();
                Err(error_of(kind))
            }
            Step::Stall(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.respond(request, "late reply".to_string(), tracker))
            }
        }
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: false,
            function_calling: false,
            vision: false,
            max_context: 4096,
            formats: vec!["text".to_string()],
        }
    }

    fn status(&self) -> ProviderStatus {
        ProviderStatus {
            available: self.is_available(),
            healthy: self.counters.is_healthy(),
            message: format!("{} scripted call(s)", self.calls()),
            last_request_at: self.counters.last_request_at(),
            avg_latency_ms: self.counters.avg_latency_ms(),
            checked_at: Utc::now(),
        }
    }

    fn metrics(&self) -> ProviderMetrics {
        self.counters.snapshot()
    }
}

/// Session echoing the prompt back
#[derive(Debug, Default)]
pub struct EchoSession {
    closed: AtomicBool,
}

impl NativeSession for EchoSession {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<NativeCompletion> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(OrchestraError::Inference("session closed".to_string()));
        }
        Ok(NativeCompletion {
            text: format!("echo: {prompt}"),
            tokens_used: params.max_tokens,
        })
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        #[allow(clippy::cast_precision_loss)]
        Ok(vec![text.len() as f32])
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Loader counting native loads, optionally slow
#[derive(Debug, Default)]
pub struct CountingLoader {
    loads: AtomicUsize,
    delay: Duration,
}

impl CountingLoader {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            loads: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModelLoader for CountingLoader {
    fn inspect(&self, path: &Path) -> Result<ModelMetadata> {
        Ok(ModelMetadata::text_generation(std::fs::metadata(path)?.len()))
    }

    fn load(&self, descriptor: &ModelDescriptor) -> Result<LoadedSession> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(LoadedSession {
            session: Box::new(EchoSession::default()),
            resident_bytes: descriptor.size_bytes,
        })
    }
}

/// Write a small placeholder model file
pub fn write_model(dir: &Path, file: &str) -> PathBuf {
    let path = dir.join(file);
    std::fs::write(&path, format!("weights of {file}")).unwrap();
    path
}

/// Registry over the reference runtime with text-generation models of the given sizes
pub fn registry_with_models(max_bytes: u64, models: &[(&str, u64)]) -> (TempDir, Arc<ModelRegistry>) {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(ModelRegistry::new(Arc::new(ReferenceLoader::default()), max_bytes));
    for (name, size) in models {
        let path = write_model(dir.path(), &format!("{name}.onnx"));
        registry
            .register_with_metadata(name, &path, ModelMetadata::text_generation(*size))
            .unwrap();
    }
    (dir, registry)
}

