//! Orchestra Engine - routing, caching and upkeep
//!
//! Sits on top of the registry and providers:
//! - [`ResultCache`]: TTL cache keyed by a request [`Fingerprint`]
//! - [`RetryPolicy`]: bounded exponential backoff with jitter
//! - [`Orchestrator`]: provider chain with retries, fallback and deadlines
//! - [`MaintenanceScheduler`]: periodic cache purge and model eviction
//! - [`Orchestra`]: composition root built from an `OrchestraConfig`
//!
//! # Example
//!
//! ```rust,ignore
//! use orchestra_core::{CompletionRequest, OrchestraConfig};
//! use orchestra_engine::Orchestra;
//!
//! # async fn example() -> orchestra_core::Result<()> {
//! let mut orchestra = Orchestra::build(OrchestraConfig::default().apply_env_overrides())?;
//! orchestra.start();
//!
//! let request = CompletionRequest::new("Explain the retry policy").with_max_tokens(64);
//! let response = orchestra.orchestrator().execute_chat_completion(&request).await?;
//! println!("{} via {}", response.text, response.provider);
//!
//! orchestra.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod app;
pub mod cache;
pub mod logging;
pub mod maintenance;
pub mod orchestrator;
pub mod retry;

pub use app::Orchestra;
pub use cache::{CacheStats, Fingerprint, ResultCache};
pub use logging::init_tracing;
pub use maintenance::{MaintenanceHandle, MaintenanceReport, MaintenanceScheduler};
pub use orchestrator::{Orchestrator, OrchestratorMetrics};
pub use retry::RetryPolicy;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
