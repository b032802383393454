//! Orchestra Provider - uniform completion backends
//!
//! A [`Provider`] turns a [`orchestra_core::CompletionRequest`] into a
//! response and keeps its own request counters. Three backends ship here:
//! - [`LocalModelProvider`]: models held by an `orchestra_models::ModelRegistry`
//! - [`RemoteProvider::router`]: hosted multi-model router, API key required
//! - [`RemoteProvider::daemon`]: locally running inference daemon
//!
//! Any of them can be wrapped in a [`BreakerProvider`] to short-circuit
//! calls to a backend that keeps failing.
//!
//! Errors are classified into the shared taxonomy so the orchestrator can
//! retry transient failures and fail fast on the rest.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod breaker;
pub mod counters;
pub mod local;
pub mod provider;
pub mod remote;

pub use breaker::{BreakerProvider, CircuitBreaker, CircuitPermit, CircuitState};
pub use counters::{ProviderCounters, RequestTracker, HEALTHY_SUCCESS_RATE};
pub use local::LocalModelProvider;
pub use provider::Provider;
pub use remote::{classify_status, RemoteProvider};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
