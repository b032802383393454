//! Provider trait
//!
//! Every backend (local model set, hosted router, local daemon) implements
//! [`Provider`] and is registered with the orchestrator as an
//! `Arc<dyn Provider>`. Backend kind is fixed at construction; callers never
//! branch on the concrete type.

use async_trait::async_trait;
use orchestra_core::{
    CompletionRequest, CompletionResponse, ProviderCapabilities, ProviderKind, ProviderMetrics,
    ProviderStatus, Result,
};
use std::fmt;

/// One backend able to serve completion requests
#[async_trait]
pub trait Provider: Send + Sync + fmt::Debug {
    /// Unique id used for routing and cache fingerprints
    fn id(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Cheap local check whether the provider can take requests at all
    fn is_available(&self) -> bool;

    /// Model names this provider can serve
    ///
    /// # Errors
    /// - transport or configuration errors for remote providers
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Probe the backend
    async fn test_connection(&self) -> bool;

    /// Run one completion
    ///
    /// Implementations record the outcome in their own counters before
    /// returning, whether it succeeded or not. A call whose future is dropped
    /// counts as failed, see [`crate::RequestTracker`].
    ///
    /// # Errors
    /// - any [`orchestra_core::OrchestraError`]; the kind drives retry decisions
    async fn execute_completion(&self, request: &CompletionRequest) -> Result<CompletionResponse>;

    fn capabilities(&self) -> ProviderCapabilities;

    fn status(&self) -> ProviderStatus;

    fn metrics(&self) -> ProviderMetrics;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn provider_is_object_safe() {
        fn assert_object(_: Option<Arc<dyn Provider>>) {}
        assert_object(None);
    }
}
