//! Multi-provider orchestrator
//!
//! Routes a completion request through an ordered chain of providers:
//! - cache lookup per provider fingerprint before any attempt
//! - bounded retries with backoff for transient errors only
//! - fallback to the next provider once one is exhausted
//! - an optional overall deadline that aborts the whole chain
//!
//! The provider table is behind a `parking_lot::RwLock`; it is cloned into
//! a chain before the first `.await`, so no lock is held while requests run.

use crate::cache::{CacheStats, Fingerprint, ResultCache};
use crate::retry::RetryPolicy;
use indexmap::IndexMap;
use metrics::{counter, histogram};
use orchestra_core::{
    CompletionRequest, CompletionResponse, OrchestraConfig, OrchestraError, ProviderFailure,
    ProviderMetrics, ProviderStatus, Result,
};
use orchestra_provider::Provider;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Aggregate orchestrator counters
#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    attempts: AtomicU64,
    provider_failures: AtomicU64,
    fallbacks: AtomicU64,
}

/// Snapshot of orchestrator state
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorMetrics {
    pub active_provider: Option<String>,
    pub available_providers: Vec<String>,
    pub providers: BTreeMap<String, ProviderMetrics>,
    pub cache: CacheStats,
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub attempts: u64,
    pub provider_failures: u64,
    pub fallbacks: u64,
}

/// Why one provider gave up
struct Exhausted {
    error: OrchestraError,
    attempts: u32,
}

/// Routes completions across registered providers
#[derive(Debug)]
pub struct Orchestrator {
    providers: RwLock<IndexMap<String, Arc<dyn Provider>>>,
    active: RwLock<Option<String>>,
    cache: Arc<ResultCache>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    counters: Counters,
}

impl Orchestrator {
    /// Create orchestrator with no providers
    #[must_use]
    pub fn new(cache: Arc<ResultCache>, retry: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            providers: RwLock::new(IndexMap::new()),
            active: RwLock::new(None),
            cache,
            retry,
            attempt_timeout,
            counters: Counters::default(),
        }
    }

    /// Create orchestrator with cache and retry settings from configuration
    #[must_use]
    pub fn from_config(config: &OrchestraConfig) -> Self {
        Self::new(
            Arc::new(ResultCache::from_config(&config.cache)),
            RetryPolicy::from_config(&config.retry),
            config.retry.attempt_timeout(),
        )
    }

    /// Add a provider at the end of the chain, replacing one with the same id
    pub fn register_provider(&self, provider: Arc<dyn Provider>) {
        let id = provider.id().to_string();
        tracing::info!(
            "Registered provider {} ({}, available: {})",
            id,
            provider.kind(),
            provider.is_available()
        );
        self.providers.write().insert(id, provider);
    }

    /// Put a registered provider first in every chain
    ///
    /// # Errors
    /// - `OrchestraError::NotFound` if no provider has this id
    pub fn set_active_provider(&self, id: &str) -> Result<()> {
        if !self.providers.read().contains_key(id) {
            return Err(OrchestraError::provider_not_found(id));
        }
        tracing::info!("Active provider set to {}", id);
        *self.active.write() = Some(id.to_string());
        Ok(())
    }

    /// Go back to routing over available providers in registration order
    pub fn clear_active_provider(&self) {
        *self.active.write() = None;
    }

    /// Id of the provider currently put first, if any
    #[must_use]
    pub fn active_provider(&self) -> Option<String> {
        self.active.read().clone()
    }

    /// Registered provider by id
    #[must_use]
    pub fn provider(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.read().get(id).cloned()
    }

    /// Ids of providers reporting themselves available, in registration order
    #[must_use]
    pub fn available_providers(&self) -> Vec<String> {
        self.providers
            .read()
            .values()
            .filter(|p| p.is_available())
            .map(|p| p.id().to_string())
            .collect()
    }

    /// Status of every registered provider, in registration order
    #[must_use]
    pub fn provider_statuses(&self) -> IndexMap<String, ProviderStatus> {
        self.providers
            .read()
            .iter()
            .map(|(id, p)| (id.clone(), p.status()))
            .collect()
    }

    /// Result cache shared with maintenance
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Snapshot of orchestration, cache and per-provider counters
    #[must_use]
    pub fn metrics(&self) -> OrchestratorMetrics {
        let c = &self.counters;
        OrchestratorMetrics {
            active_provider: self.active_provider(),
            available_providers: self.available_providers(),
            providers: self
                .providers
                .read()
                .iter()
                .map(|(id, p)| (id.clone(), p.metrics()))
                .collect(),
            cache: self.cache.stats(),
            requests: c.requests.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            cache_misses: c.cache_misses.load(Ordering::Relaxed),
            attempts: c.attempts.load(Ordering::Relaxed),
            provider_failures: c.provider_failures.load(Ordering::Relaxed),
            fallbacks: c.fallbacks.load(Ordering::Relaxed),
        }
    }

    /// Run a completion through the full provider chain
    ///
    /// # Errors
    /// - `OrchestraError::NoProvidersAvailable` if the chain is empty
    /// - `OrchestraError::AllProvidersFailed` with the last error of each provider
    pub async fn execute_chat_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        let chain = self.chain()?;
        self.run(chain, request, None).await
    }

    /// Run a completion against exactly one provider
    ///
    /// # Errors
    /// - `OrchestraError::NotFound` for an unknown provider id
    /// - `OrchestraError::AllProvidersFailed` once its attempts are exhausted
    pub async fn execute_with_provider(
        &self,
        request: &CompletionRequest,
        provider: &str,
    ) -> Result<CompletionResponse> {
        let provider = self
            .provider(provider)
            .ok_or_else(|| OrchestraError::provider_not_found(provider))?;
        self.run(vec![provider], request, None).await
    }

    /// Run a completion through the chain within an overall time budget
    ///
    /// # Errors
    /// - `OrchestraError::DeadlineExceeded` once the budget is spent, even
    ///   mid-chain
    /// - otherwise as [`Self::execute_chat_completion`]
    pub async fn execute_with_deadline(
        &self,
        request: &CompletionRequest,
        budget: Duration,
    ) -> Result<CompletionResponse> {
        let chain = self.chain()?;
        self.run(chain, request, Some(budget)).await
    }

    fn chain(&self) -> Result<Vec<Arc<dyn Provider>>> {
        let providers = self.providers.read();
        let active = self.active.read().clone();

        let chain: Vec<Arc<dyn Provider>> = match active.as_deref().and_then(|id| providers.get(id)) {
            Some(first) => std::iter::once(Arc::clone(first))
                .chain(
                    providers
                        .values()
                        .filter(|p| p.id() != first.id())
                        .cloned(),
                )
                .collect(),
            None => providers
                .values()
                .filter(|p| p.is_available())
                .cloned()
                .collect(),
        };

        if chain.is_empty() {
            return Err(OrchestraError::NoProvidersAvailable);
        }
        Ok(chain)
    }

    async fn run(
        &self,
        chain: Vec<Arc<dyn Provider>>,
        request: &CompletionRequest,
        budget: Option<Duration>,
    ) -> Result<CompletionResponse> {
        let started = Instant::now();
        let deadline = budget.map(|b| started + b);
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let mut failures = Vec::new();
        for (position, provider) in chain.iter().enumerate() {
            if position > 0 {
                self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
            }

            let key = Fingerprint::of(provider.id(), request);
            if let Some(hit) = self.cache.get(&key) {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Cache hit for {} on {}", key.short(), provider.id());
                return Ok(hit);
            }
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

            match self.attempt(provider.as_ref(), request, started, deadline).await {
                Ok(response) => {
                    self.cache.insert(key, response.clone());
                    histogram!("orchestra_completion_latency_ms", "provider" => provider.id().to_string())
                        .record(started.elapsed().as_secs_f64() * 1000.0);
                    return Ok(response);
                }
                Err(Exhausted { error, attempts }) => {
                    if matches!(error, OrchestraError::DeadlineExceeded { .. }) {
                        tracing::error!("Deadline exceeded on provider {}", provider.id());
                        return Err(error);
                    }
                    tracing::warn!(
                        "Provider {} gave up after {} attempt(s): {}",
                        provider.id(),
                        attempts,
                        error
                    );
                    failures.push(ProviderFailure::new(provider.id(), &error, attempts));
                }
            }
        }

        tracing::error!("All {} provider(s) failed", failures.len());
        Err(OrchestraError::AllProvidersFailed { failures })
    }

    /// Attempt one provider until success, a non-retryable error or exhaustion
    async fn attempt(
        &self,
        provider: &dyn Provider,
        request: &CompletionRequest,
        started: Instant,
        deadline: Option<Instant>,
    ) -> std::result::Result<CompletionResponse, Exhausted> {
        let mut attempt = 0u32;
        loop {
            let timeout = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(Exhausted {
                            error: deadline_exceeded(started),
                            attempts: attempt,
                        });
                    }
                    remaining.min(self.attempt_timeout)
                }
                None => self.attempt_timeout,
            };

            attempt += 1;
            self.counters.attempts.fetch_add(1, Ordering::Relaxed);
            counter!("orchestra_attempts_total", "provider" => provider.id().to_string())
                .increment(1);

            let outcome = match tokio::time::timeout(timeout, provider.execute_completion(request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(OrchestraError::Timeout {
                    duration_ms: millis(timeout),
                }),
            };

            let error = match outcome {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            self.counters.provider_failures.fetch_add(1, Ordering::Relaxed);
            counter!(
                "orchestra_provider_failures_total",
                "provider" => provider.id().to_string(),
                "kind" => error.kind().as_str()
            )
            .increment(1);

            // An attempt cut short by the overall budget ends the chain
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(Exhausted {
                    error: deadline_exceeded(started),
                    attempts: attempt,
                });
            }

            if !self.retry.should_retry(&error, attempt) {
                return Err(Exhausted {
                    error,
                    attempts: attempt,
                });
            }

            let delay = self.retry.delay_for(attempt);
            if deadline.is_some_and(|d| Instant::now() + delay >= d) {
                return Err(Exhausted {
                    error: deadline_exceeded(started),
                    attempts: attempt,
                });
            }

            tracing::warn!(
                "Attempt {}/{} on {} failed ({}), retrying in {:?}",
                attempt,
                self.retry.max_attempts,
                provider.id(),
                error,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn deadline_exceeded(started: Instant) -> OrchestraError {
    OrchestraError::DeadlineExceeded {
        elapsed_ms: millis(started.elapsed()),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}
