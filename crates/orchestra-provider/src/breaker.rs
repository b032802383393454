//! Circuit breaker
//!
//! [`CircuitBreaker`] tracks consecutive transient failures of one provider
//! and short-circuits calls while open. [`BreakerProvider`] wraps any
//! [`Provider`] with one.
//!
//! Closed -> Open after `failure_threshold` consecutive transient failures.
//! Open -> HalfOpen once `open_timeout` has passed since the last failure.
//! HalfOpen -> Closed after `success_threshold` successes, back to Open on
//! the first transient failure.
//!
//! Only retryable error kinds count. A rejected or misconfigured request says
//! nothing about backend health and leaves the breaker untouched.

use crate::provider::Provider;
use async_trait::async_trait;
use metrics::counter;
use orchestra_core::{
    BreakerConfig, CompletionRequest, CompletionResponse, OrchestraError, ProviderCapabilities,
    ProviderKind, ProviderMetrics, ProviderStatus, Result,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Breaker position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
}

/// Failure-counting breaker for one provider
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    success_threshold: u32,
    open_timeout: Duration,
    inner: Mutex<Inner>,
    rejected: AtomicU64,
}

impl CircuitBreaker {
    /// Create a closed breaker
    #[must_use]
    pub fn new(name: impl Into<String>, config: &BreakerConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            open_timeout: config.open_timeout(),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
            }),
            rejected: AtomicU64::new(0),
        }
    }

    /// Current state, moving Open to HalfOpen if the timeout has passed
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Calls short-circuited so far
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Ask to make a call
    ///
    /// # Errors
    /// - `OrchestraError::CircuitOpen` while the breaker is open
    pub fn acquire(&self) -> Result<CircuitPermit<'_>> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        if inner.state == CircuitState::Open {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            counter!("orchestra_circuit_rejections_total", "provider" => self.name.clone())
                .increment(1);
            let retry_in = inner
                .opened_at
                .map_or(self.open_timeout, |at| {
                    (at + self.open_timeout).saturating_duration_since(Instant::now())
                });
            return Err(OrchestraError::CircuitOpen {
                provider: self.name.clone(),
                retry_in_ms: u64::try_from(retry_in.as_millis()).unwrap_or(u64::MAX),
            });
        }
        Ok(CircuitPermit {
            breaker: self,
            settled: false,
        })
    }

    fn refresh(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open
            && inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.open_timeout)
        {
            tracing::info!("Circuit for {} is half-open", self.name);
            inner.state = CircuitState::HalfOpen;
            inner.successes = 0;
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.success_threshold {
                    tracing::info!(
                        "Circuit for {} closed after {} half-open success(es)",
                        self.name,
                        inner.successes
                    );
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Closed | CircuitState::Open => inner.failures = 0,
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failures += 1;
        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failures >= self.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            tracing::warn!(
                "Circuit for {} opened after {} failure(s)",
                self.name,
                inner.failures
            );
            counter!("orchestra_circuit_opened_total", "provider" => self.name.clone())
                .increment(1);
            inner.state = CircuitState::Open;
            inner.successes = 0;
            inner.opened_at = Some(Instant::now());
        }
    }
}

/// Permission for one call; counts as a failure if dropped unsettled
#[derive(Debug)]
#[must_use = "a permit that is never settled counts as a failure"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl CircuitPermit<'_> {
    /// Feed the call's outcome back to the breaker
    pub fn record<T>(mut self, outcome: &Result<T>) {
        self.settled = true;
        match outcome {
            Ok(_) => self.breaker.on_success(),
            Err(e) if e.is_retryable() => self.breaker.on_failure(),
            Err(_) => {}
        }
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_failure();
        }
    }
}

/// Provider guarded by a circuit breaker
#[derive(Debug)]
pub struct BreakerProvider {
    inner: Arc<dyn Provider>,
    breaker: CircuitBreaker,
}

impl BreakerProvider {
    #[must_use]
    pub fn new(inner: Arc<dyn Provider>, config: &BreakerConfig) -> Self {
        let breaker = CircuitBreaker::new(inner.id(), config);
        Self { inner, breaker }
    }

    #[inline]
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl Provider for BreakerProvider {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn kind(&self) -> ProviderKind {
        self.inner.kind()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        self.inner.list_models().await
    }

    async fn test_connection(&self) -> bool {
        self.inner.test_connection().await
    }

    async fn execute_completion(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let permit = self.breaker.acquire()?;
        let outcome = self.inner.execute_completion(request).await;
        permit.record(&outcome);
        outcome
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.inner.capabilities()
    }

    fn status(&self) -> ProviderStatus {
        let mut status = self.inner.status();
        let state = self.breaker.state();
        if state != CircuitState::Closed {
            status.healthy = false;
            status.message = format!("{}; circuit {}", status.message, state);
        }
        status
    }

    fn metrics(&self) -> ProviderMetrics {
        self.inner.metrics()
    }
}
