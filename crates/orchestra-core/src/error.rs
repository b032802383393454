//! Error types for Orchestra
//!
//! One error enum is shared by every layer so that the orchestrator can make
//! retry and fallback decisions from the error kind alone:
//! - Registry and lifecycle failures
//! - Executor capability and runtime failures
//! - Provider configuration and transport failures
//! - Orchestration outcomes (deadline, empty or exhausted chain)

use crate::types::{Capability, ModelStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Convenience result alias
pub type Result<T, E = OrchestraError> = std::result::Result<T, E>;

/// Main Orchestra error type
#[derive(Debug, thiserror::Error)]
pub enum OrchestraError {
    /// Unknown model or provider
    #[error("not found: {0}")]
    NotFound(String),

    /// Model name collides with an existing registration
    #[error("model already registered: {0}")]
    AlreadyRegistered(String),

    /// A load or unload for this model is already in progress
    #[error("model busy: {id} is {status}")]
    Busy { id: String, status: ModelStatus },

    /// Lifecycle transition outside the allowed table
    #[error("illegal model transition for {id}: {from} -> {to}")]
    IllegalTransition {
        id: String,
        from: ModelStatus,
        to: ModelStatus,
    },

    /// Model does not declare the requested capability
    #[error("model {model} does not support {capability}")]
    CapabilityUnsupported {
        model: String,
        capability: Capability,
    },

    /// Missing credentials or invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Native runtime or backend failure during execution
    #[error("inference failed: {0}")]
    Inference(String),

    /// Transport failure talking to a remote backend
    #[error("network error: {0}")]
    Network(String),

    /// A single attempt exceeded its timeout
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Backend refused the request as malformed
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Provider breaker is open and short-circuits calls
    #[error("circuit open for provider {provider}, retry in {retry_in_ms}ms")]
    CircuitOpen { provider: String, retry_in_ms: u64 },

    /// The caller-supplied overall deadline elapsed
    #[error("deadline exceeded after {elapsed_ms}ms")]
    DeadlineExceeded { elapsed_ms: u64 },

    /// No provider registered or available
    #[error("no providers available")]
    NoProvidersAvailable,

    /// Every provider in the fallback chain failed
    #[error("all providers failed: {}", format_failures(failures))]
    AllProvidersFailed { failures: Vec<ProviderFailure> },

    /// Filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestraError {
    /// Classify the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyRegistered(_) => ErrorKind::AlreadyRegistered,
            Self::Busy { .. } | Self::IllegalTransition { .. } => ErrorKind::Busy,
            Self::CapabilityUnsupported { .. } => ErrorKind::CapabilityUnsupported,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Inference(_) => ErrorKind::Inference,
            Self::Network(_) => ErrorKind::Network,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Rejected(_) => ErrorKind::Rejected,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            Self::NoProvidersAvailable => ErrorKind::NoProvidersAvailable,
            Self::AllProvidersFailed { .. } => ErrorKind::AllProvidersFailed,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Create a not-found error for a model id
    #[inline]
    pub fn model_not_found(id: impl fmt::Display) -> Self {
        Self::NotFound(format!("model '{id}'"))
    }

    /// Create a not-found error for a provider id
    #[inline]
    pub fn provider_not_found(id: impl fmt::Display) -> Self {
        Self::NotFound(format!("provider '{id}'"))
    }
}

/// Error classification used for routing decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyRegistered,
    Busy,
    CapabilityUnsupported,
    Configuration,
    Inference,
    Network,
    Timeout,
    Rejected,
    CircuitOpen,
    DeadlineExceeded,
    NoProvidersAvailable,
    AllProvidersFailed,
    Io,
}

impl ErrorKind {
    /// Transient kinds worth another attempt against the same provider
    #[inline]
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Busy | Self::Inference | Self::Network | Self::Timeout
        )
    }

    /// Stable lowercase name, used as a metrics label
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyRegistered => "already_registered",
            Self::Busy => "busy",
            Self::CapabilityUnsupported => "capability_unsupported",
            Self::Configuration => "configuration",
            Self::Inference => "inference",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Rejected => "rejected",
            Self::CircuitOpen => "circuit_open",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::NoProvidersAvailable => "no_providers_available",
            Self::AllProvidersFailed => "all_providers_failed",
            Self::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last error observed for one provider in a fallback chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    /// Provider id
    pub provider: String,
    /// Error classification
    pub kind: ErrorKind,
    /// Rendered error message
    pub message: String,
    /// Attempts made against this provider
    pub attempts: u32,
}

impl ProviderFailure {
    /// Capture the last error of a provider
    #[must_use]
    pub fn new(provider: impl Into<String>, error: &OrchestraError, attempts: u32) -> Self {
        Self {
            provider: provider.into(),
            kind: error.kind(),
            message: error.to_string(),
            attempts,
        }
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} after {} attempt(s)]: {}",
            self.provider, self.kind, self.attempts, self.message
        )
    }
}

fn format_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = OrchestraError::AlreadyRegistered("m1".to_string());
        assert!(err.to_string().contains("already registered"));

        let err = OrchestraError::Busy {
            id: "m1".to_string(),
            status: ModelStatus::Loading,
        };
        assert_eq!(err.to_string(), "model busy: m1 is loading");
    }

    #[test]
    fn error_is_retryable() {
        assert!(OrchestraError::Inference("boom".to_string()).is_retryable());
        assert!(OrchestraError::Network("reset".to_string()).is_retryable());
        assert!(OrchestraError::Timeout { duration_ms: 10 }.is_retryable());
        assert!(OrchestraError::Busy {
            id: "m".to_string(),
            status: ModelStatus::Unloading
        }
        .is_retryable());

        assert!(!OrchestraError::Configuration("no key".to_string()).is_retryable());
        assert!(!OrchestraError::CapabilityUnsupported {
            model: "m".to_string(),
            capability: Capability::Embeddings
        }
        .is_retryable());
        assert!(!OrchestraError::DeadlineExceeded { elapsed_ms: 5 }.is_retryable());
        assert!(!OrchestraError::Rejected("bad".to_string()).is_retryable());
        assert!(!OrchestraError::CircuitOpen {
            provider: "router".to_string(),
            retry_in_ms: 100
        }
        .is_retryable());
    }

    #[test]
    fn aggregated_failure_lists_every_provider() {
        let failures = vec![
            ProviderFailure::new("router", &OrchestraError::Configuration("missing key".into()), 1),
            ProviderFailure::new("local", &OrchestraError::Inference("session closed".into()), 3),
        ];
        let err = OrchestraError::AllProvidersFailed { failures };
        let msg = err.to_string();

        assert!(msg.contains("router [configuration after 1 attempt(s)]"));
        assert!(msg.contains("local [inference after 3 attempt(s)]"));
        assert_eq!(err.kind(), ErrorKind::AllProvidersFailed);
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: OrchestraError = io.into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
