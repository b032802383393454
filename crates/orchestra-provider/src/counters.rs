//! Lock-free provider counters
//!
//! Totals are plain atomics; per-model counters live in a `DashMap` keyed by
//! model id. Averages are derived on read from cumulative latency, never
//! stored, so every stored value only grows.
//!
//! Providers count a call through a [`RequestTracker`]. A tracker dropped
//! before it is settled, as happens when the caller times out and drops the
//! provider future, records a failure.

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use metrics::{counter, histogram};
use orchestra_core::{ProviderMetrics, RequestMetrics};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Success rate a provider must exceed to be reported healthy
pub const HEALTHY_SUCCESS_RATE: f64 = 0.5;

/// Cost is accumulated in micro-dollars to stay atomic
const COST_SCALE: f64 = 1_000_000.0;

const NEVER: i64 = i64::MIN;

#[derive(Debug, Default)]
struct ModelCounters {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    success_latency_ms: AtomicU64,
}

/// Request counters for one provider
#[derive(Debug)]
pub struct ProviderCounters {
    provider: String,
    total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    success_latency_ms: AtomicU64,
    cost_micros: AtomicU64,
    last_request_ms: AtomicI64,
    per_model: DashMap<String, ModelCounters>,
}

impl ProviderCounters {
    /// Create zeroed counters
    #[must_use]
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            success_latency_ms: AtomicU64::new(0),
            cost_micros: AtomicU64::new(0),
            last_request_ms: AtomicI64::new(NEVER),
            per_model: DashMap::new(),
        }
    }

    /// Start counting one request against `model`
    pub fn track(&self, model: impl Into<String>) -> RequestTracker<'_> {
        RequestTracker {
            counters: self,
            model: model.into(),
            started: Instant::now(),
            settled: false,
        }
    }

    /// Record a successful request
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn record_success(&self, model: &str, latency: Duration, cost: f64) {
        let ms = duration_ms(latency);
        self.begin(model);
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.success_latency_ms.fetch_add(ms, Ordering::Relaxed);
        self.cost_micros
            .fetch_add((cost.max(0.0) * COST_SCALE).round() as u64, Ordering::Relaxed);
        self.with_model(model, |m| {
            m.successes.fetch_add(1, Ordering::Relaxed);
            m.success_latency_ms.fetch_add(ms, Ordering::Relaxed);
        });

        counter!("orchestra_provider_requests_total", "provider" => self.provider.clone(), "outcome" => "success")
            .increment(1);
        histogram!("orchestra_provider_latency_ms", "provider" => self.provider.clone(), "outcome" => "success")
            .record(ms as f64);
    }

    /// Record a failed request
    ///
    /// Failure latency is exported but kept out of the success average.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_failure(&self, model: &str, latency: Duration) {
        self.begin(model);
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.with_model(model, |m| {
            m.failures.fetch_add(1, Ordering::Relaxed);
        });

        counter!("orchestra_provider_requests_total", "provider" => self.provider.clone(), "outcome" => "failure")
            .increment(1);
        histogram!("orchestra_provider_latency_ms", "provider" => self.provider.clone(), "outcome" => "failure")
            .record(duration_ms(latency) as f64);
    }

    fn begin(&self, model: &str) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.last_request_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        self.with_model(model, |m| {
            m.requests.fetch_add(1, Ordering::Relaxed);
        });
    }

    fn with_model(&self, model: &str, f: impl FnOnce(&ModelCounters)) {
        if let Some(counters) = self.per_model.get(model) {
            f(&counters);
            return;
        }
        let entry = self.per_model.entry(model.to_string()).or_default();
        f(&entry);
    }

    #[inline]
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Successful over total, 0.0 when idle
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        self.successes.load(Ordering::Relaxed) as f64 / total as f64
    }

    /// Idle, or success rate above [`HEALTHY_SUCCESS_RATE`]
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.total_requests() == 0 || self.success_rate() > HEALTHY_SUCCESS_RATE
    }

    /// Mean latency of successful requests
    #[must_use]
    pub fn avg_latency_ms(&self) -> f64 {
        average(
            self.success_latency_ms.load(Ordering::Relaxed),
            self.successes.load(Ordering::Relaxed),
        )
    }

    #[must_use]
    pub fn last_request_at(&self) -> Option<DateTime<Utc>> {
        match self.last_request_ms.load(Ordering::Relaxed) {
            NEVER => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }

    /// Counters of one model
    #[must_use]
    pub fn model(&self, model: &str) -> Option<RequestMetrics> {
        self.per_model.get(model).map(|m| snapshot_model(&m))
    }

    /// Detached copy of every counter
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> ProviderMetrics {
        ProviderMetrics {
            total_requests: self.total_requests(),
            successful_requests: self.successes.load(Ordering::Relaxed),
            failed_requests: self.failures.load(Ordering::Relaxed),
            avg_latency_ms: self.avg_latency_ms(),
            total_cost: self.cost_micros.load(Ordering::Relaxed) as f64 / COST_SCALE,
            last_request_at: self.last_request_at(),
            success_rate: self.success_rate(),
            per_model: self
                .per_model
                .iter()
                .map(|e| (e.key().clone(), snapshot_model(e.value())))
                .collect(),
        }
    }
}

/// One in-flight request; counted as failed unless settled
#[derive(Debug)]
#[must_use = "a tracker that is never settled counts as a failure"]
pub struct RequestTracker<'a> {
    counters: &'a ProviderCounters,
    model: String,
    started: Instant,
    settled: bool,
}

impl RequestTracker<'_> {
    /// Re-key the request once the serving model is known
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Record success and return the measured latency
    pub fn succeed(mut self, cost: f64) -> Duration {
        self.settled = true;
        let elapsed = self.elapsed();
        self.counters.record_success(&self.model, elapsed, cost);
        elapsed
    }

    /// Record failure and return the measured latency
    pub fn fail(mut self) -> Duration {
        self.settled = true;
        let elapsed = self.elapsed();
        self.counters.record_failure(&self.model, elapsed);
        elapsed
    }
}

impl Drop for RequestTracker<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(
                "{} request on {} abandoned after {:?}",
                self.counters.provider,
                self.model,
                self.started.elapsed()
            );
            self.counters.record_failure(&self.model, self.started.elapsed());
        }
    }
}

fn snapshot_model(m: &ModelCounters) -> RequestMetrics {
    let successes = m.successes.load(Ordering::Relaxed);
    RequestMetrics {
        requests: m.requests.load(Ordering::Relaxed),
        successes,
        failures: m.failures.load(Ordering::Relaxed),
        avg_latency_ms: average(m.success_latency_ms.load(Ordering::Relaxed), successes),
    }
}

#[allow(clippy::cast_precision_loss)]
fn average(sum: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

#[allow(clippy::cast_possible_truncation)]
fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}
