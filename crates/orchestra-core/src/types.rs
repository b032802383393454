//! Core types for Orchestra
//!
//! Defines the data shared between the registry, providers and orchestrator:
//! - Model identifiers, descriptors and lifecycle status
//! - Completion requests and responses
//! - Provider capability, status and metrics snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use ulid::Ulid;

/// Model identifier derived from the registered name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelId(String);

impl ModelId {
    /// Derive an id from a model name: lowercased, spaces as `_`
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self(name.trim().to_lowercase().replace(' ', "_"))
    }

    /// Display name for a model file, extension stripped
    #[must_use]
    pub fn name_from_path(path: &Path) -> Option<String> {
        path.file_stem()
            .and_then(|s| s.to_str())
            .map(ToString::to_string)
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelId {
    fn from(value: &str) -> Self {
        Self::from_name(value)
    }
}

/// Identifier of one resident model instance (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HandleId(pub Ulid);

impl HandleId {
    /// Generate new handle ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a model can be asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Prompt in, text out
    TextGeneration,
    /// Text in, vector out
    Embeddings,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TextGeneration => f.write_str("text-generation"),
            Self::Embeddings => f.write_str("embeddings"),
        }
    }
}

/// Lifecycle status of a registered model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    /// Registered, not resident
    Available,
    /// Native load in progress
    Loading,
    /// Resident and serving
    Loaded,
    /// Native close in progress
    Unloading,
    /// Last load or unload failed
    Failed,
}

impl ModelStatus {
    /// A load or unload is in flight
    #[inline]
    #[must_use]
    pub fn is_transitioning(self) -> bool {
        matches!(self, Self::Loading | Self::Unloading)
    }
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Available => "available",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Unloading => "unloading",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Coarse metadata gathered when a model file is inspected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Estimated resident memory once loaded
    pub size_bytes: u64,
    /// Declared capabilities
    pub capabilities: Vec<Capability>,
}

impl ModelMetadata {
    /// Metadata for a text-generation model
    #[inline]
    #[must_use]
    pub fn text_generation(size_bytes: u64) -> Self {
        Self {
            size_bytes,
            capabilities: vec![Capability::TextGeneration],
        }
    }

    /// Metadata for an embeddings model
    #[inline]
    #[must_use]
    pub fn embeddings(size_bytes: u64) -> Self {
        Self {
            size_bytes,
            capabilities: vec![Capability::Embeddings],
        }
    }

    /// Add a capability
    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }
}

/// A model known to the system, loaded or not
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Stable id derived from the name
    pub id: ModelId,
    /// Registered name
    pub name: String,
    /// Model file on disk
    pub path: PathBuf,
    /// Declared capabilities
    pub capabilities: Vec<Capability>,
    /// Estimated resident memory
    pub size_bytes: u64,
    /// Current lifecycle status
    pub status: ModelStatus,
    /// Registration time
    pub registered_at: DateTime<Utc>,
    /// Message of the last failed load or unload
    pub last_error: Option<String>,
}

impl ModelDescriptor {
    /// Create a descriptor in `Available` status
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, metadata: ModelMetadata) -> Self {
        let name = name.into();
        Self {
            id: ModelId::from_name(&name),
            name,
            path: path.into(),
            capabilities: metadata.capabilities,
            size_bytes: metadata.size_bytes,
            status: ModelStatus::Available,
            registered_at: Utc::now(),
            last_error: None,
        }
    }

    /// Check a declared capability
    #[inline]
    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Aggregate memory picture of the registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Sum of resident estimates of loaded models
    pub used_bytes: u64,
    /// Number of loaded models
    pub loaded_count: usize,
    /// Configured ceiling
    pub max_bytes: u64,
}

impl MemoryStats {
    /// Usage as a fraction of the ceiling (0.0 - 1.0+)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn usage_ratio(&self) -> f64 {
        if self.max_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.max_bytes as f64
    }

    /// Usage as a percentage of the ceiling
    #[inline]
    #[must_use]
    pub fn usage_percent(&self) -> f64 {
        self.usage_ratio() * 100.0
    }
}

/// Provider-agnostic completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Target model; `None` means first capable model
    pub model: Option<String>,
    /// Prompt text
    pub prompt: String,
    /// Upper bound on generated tokens
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
}

impl CompletionRequest {
    /// Default generation budget
    pub const DEFAULT_MAX_TOKENS: u32 = 2048;
    /// Default sampling temperature
    pub const DEFAULT_TEMPERATURE: f32 = 0.7;

    /// Create request with defaults
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            model: None,
            prompt: prompt.into(),
            max_tokens: Self::DEFAULT_MAX_TOKENS,
            temperature: Self::DEFAULT_TEMPERATURE,
        }
    }

    /// With explicit model
    #[inline]
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// With max tokens
    #[inline]
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// With temperature
    #[inline]
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Completion response returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Generated text
    pub text: String,
    /// Tokens consumed
    pub tokens_used: u32,
    /// Estimated cost in USD
    pub cost_estimate: f64,
    /// Backend latency
    pub latency_ms: u64,
    /// Provider that produced the text
    pub provider: String,
    /// Model that produced the text
    pub model: String,
    /// Served from the result cache
    pub cached: bool,
}

/// Kind of backend behind a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Locally loaded models
    Local,
    /// Hosted router API
    Router,
    /// Local inference daemon
    Daemon,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Router => f.write_str("router"),
            Self::Daemon => f.write_str("daemon"),
        }
    }
}

/// Static feature surface of a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub streaming: bool,
    pub function_calling: bool,
    pub vision: bool,
    /// Context window in tokens
    pub max_context: u32,
    /// Supported model formats
    pub formats: Vec<String>,
}

/// Point-in-time health report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub available: bool,
    /// Advisory, never enforced as a gate
    pub healthy: bool,
    pub message: String,
    pub last_request_at: Option<DateTime<Utc>>,
    pub avg_latency_ms: f64,
    pub checked_at: DateTime<Utc>,
}

/// Per-model counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMetrics {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
}

/// Per-provider counters snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Mean latency of successful requests
    pub avg_latency_ms: f64,
    pub total_cost: f64,
    pub last_request_at: Option<DateTime<Utc>>,
    /// Successful over total, 0.0 when idle
    pub success_rate: f64,
    pub per_model: BTreeMap<String, RequestMetrics>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_id_from_name() {
        assert_eq!(ModelId::from_name("Phi Mini").as_str(), "phi_mini");
        assert_eq!(
            ModelId::name_from_path(Path::new("/models/Phi Mini.onnx")).as_deref(),
            Some("Phi Mini")
        );
        assert_eq!(ModelId::from_name("m1").as_str(), "m1");
        assert_eq!(ModelId::from_name("All MiniLM Embedding").as_str(), "all_minilm_embedding");
    }

    #[test]
    fn descriptor_starts_available() {
        let d = ModelDescriptor::new("m1", "/tmp/m1.onnx", ModelMetadata::text_generation(10));
        assert_eq!(d.status, ModelStatus::Available);
        assert!(d.supports(Capability::TextGeneration));
        assert!(!d.supports(Capability::Embeddings));
    }

    #[test]
    fn memory_usage_percent() {
        let stats = MemoryStats {
            used_bytes: 80,
            loaded_count: 2,
            max_bytes: 100,
        };
        assert!((stats.usage_percent() - 80.0).abs() < f64::EPSILON);
        assert!((MemoryStats::default().usage_ratio()).abs() < f64::EPSILON);
    }

    #[test]
    fn request_builder() {
        let req = CompletionRequest::new("hi")
            .with_model("m1")
            .with_max_tokens(8)
            .with_temperature(0.0);
        assert_eq!(req.model.as_deref(), Some("m1"));
        assert_eq!(req.max_tokens, 8);
        assert!(req.temperature.abs() < f32::EPSILON);
    }

    #[test]
    fn metadata_capabilities_are_deduplicated() {
        let meta = ModelMetadata::text_generation(1)
            .with_capability(Capability::Embeddings)
            .with_capability(Capability::TextGeneration);
        assert_eq!(meta.capabilities.len(), 2);
    }
}
