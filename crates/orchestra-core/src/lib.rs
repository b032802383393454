//! Orchestra Core - shared vocabulary of the workspace
//!
//! Everything the registry, providers and orchestrator exchange lives here:
//! - Model descriptors, lifecycle status and memory statistics
//! - Completion requests and responses
//! - Provider capability, status and metrics snapshots
//! - The error taxonomy used for retry and fallback decisions
//! - TOML configuration with defaults and environment overrides
//!
//! # Example
//!
//! ```rust
//! use orchestra_core::{CompletionRequest, OrchestraConfig};
//!
//! let config = OrchestraConfig::from_toml_str("[retry]\nmax_attempts = 2").unwrap();
//! assert_eq!(config.retry.max_attempts, 2);
//!
//! let request = CompletionRequest::new("Summarize the endpoint").with_max_tokens(64);
//! assert!(request.model.is_none());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    BreakerConfig, CacheConfig, LocalProviderConfig, MaintenanceConfig, OrchestraConfig,
    ProvidersConfig, RegistryConfig, RemoteProviderConfig, RetryConfig,
};
pub use error::{ErrorKind, OrchestraError, ProviderFailure, Result};
pub use types::{
    Capability, CompletionRequest, CompletionResponse, HandleId, MemoryStats, ModelDescriptor,
    ModelId, ModelMetadata, ModelStatus, ProviderCapabilities, ProviderKind, ProviderMetrics,
    ProviderStatus, RequestMetrics,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
