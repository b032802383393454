//! Orchestrator Tests
//!
//! Routing, retries, fallback, caching and deadlines against scripted providers.

use orchestra_core::{BreakerConfig, CompletionRequest, ErrorKind, OrchestraError};
use orchestra_engine::{Orchestrator, ResultCache, RetryPolicy};
use orchestra_provider::{BreakerProvider, Provider};
use orchestra_test_utils::{ScriptedProvider, Step};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(10),
        jitter: false,
    }
}

fn orchestrator() -> Orchestrator {
    orchestrator_with_timeout(Duration::from_secs(120))
}

fn orchestrator_with_timeout(attempt_timeout: Duration) -> Orchestrator {
    Orchestrator::new(
        Arc::new(ResultCache::new(100, Duration::from_secs(300))),
        policy(),
        attempt_timeout,
    )
}

fn request() -> CompletionRequest {
    CompletionRequest::new("summarize the incident").with_max_tokens(32)
}

#[tokio::test(start_paused = true)]
async fn test_fallback_after_retries_exhausted() {
    let orch = orchestrator();
    let a = ScriptedProvider::failing("a", ErrorKind::Inference).into_arc();
    let b = ScriptedProvider::new("b").into_arc();
    orch.register_provider(a.clone());
    orch.register_provider(b.clone());

    let started = Instant::now();
    let response = orch.execute_chat_completion(&request()).await.unwrap();

    assert_eq!(response.provider, "b");
    assert_eq!(response.text, "reply from b");
    assert!(!response.cached);
    assert_eq!(a.calls(), 3);
    assert_eq!(a.metrics().failed_requests, 3);
    assert_eq!(b.calls(), 1);
    // Backoff of 1s then 2s between A's three attempts
    assert!(started.elapsed() >= Duration::from_secs(3));

    let metrics = orch.metrics();
    assert_eq!(metrics.attempts, 4);
    assert_eq!(metrics.provider_failures, 3);
    assert_eq!(metrics.fallbacks, 1);
    assert_eq!(metrics.providers["a"].failed_requests, 3);
}

#[tokio::test(start_paused = true)]
async fn test_configuration_error_fails_fast() {
    let orch = orchestrator();
    let a = ScriptedProvider::failing("a", ErrorKind::Configuration).into_arc();
    let b = ScriptedProvider::new("b").into_arc();
    orch.register_provider(a.clone());
    orch.register_provider(b.clone());

    let started = Instant::now();
    let response = orch.execute_chat_completion(&request()).await.unwrap();

    assert_eq!(response.provider, "b");
    assert_eq!(a.calls(), 1);
    assert!(started.elapsed() < Duration::from_millis(1));
}

#[tokio::test(start_paused = true)]
async fn test_busy_is_retried() {
    let orch = orchestrator();
    let a = ScriptedProvider::new("a")
        .with_script([Step::Fail(ErrorKind::Busy)])
        .into_arc();
    orch.register_provider(a.clone());

    let response = orch.execute_chat_completion(&request()).await.unwrap();

    assert_eq!(response.provider, "a");
    assert_eq!(a.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_all_providers_failed_reports_last_error_per_provider() {
    let orch = orchestrator();
    orch.register_provider(ScriptedProvider::failing("a", ErrorKind::Configuration).into_arc());
    orch.register_provider(ScriptedProvider::failing("b", ErrorKind::Network).into_arc());
    orch.register_provider(ScriptedProvider::failing("c", ErrorKind::Rejected).into_arc());

    let err = orch.execute_chat_completion(&request()).await.unwrap_err();

    let OrchestraError::AllProvidersFailed { failures } = err else {
        panic!("expected AllProvidersFailed");
    };
    let summary: Vec<(&str, ErrorKind, u32)> = failures
        .iter()
        .map(|f| (f.provider.as_str(), f.kind, f.attempts))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("a", ErrorKind::Configuration, 1),
            ("b", ErrorKind::Network, 3),
            ("c", ErrorKind::Rejected, 1),
        ]
    );
}

#[tokio::test]
async fn test_cache_hit_skips_backend() {
    let orch = orchestrator();
    let a = ScriptedProvider::new("a").into_arc();
    orch.register_provider(a.clone());

    let first = orch.execute_chat_completion(&request()).await.unwrap();
    let second = orch.execute_chat_completion(&request()).await.unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(second.text, first.text);
    assert_eq!(a.calls(), 1);

    // Any parameter change is a different fingerprint
    orch.execute_chat_completion(&request().with_temperature(0.1))
        .await
        .unwrap();
    assert_eq!(a.calls(), 2);

    let metrics = orch.metrics();
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(metrics.cache_misses, 2);
    assert_eq!(metrics.cache.entries, 2);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_aborts_chain() {
    let orch = orchestrator();
    let a = ScriptedProvider::new("a")
        .always(Step::Stall(Duration::from_secs(10)))
        .into_arc();
    let b = ScriptedProvider::new("b").into_arc();
    orch.register_provider(a.clone());
    orch.register_provider(b.clone());

    let err = orch
        .execute_with_deadline(&request(), Duration::from_secs(2))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestraError::DeadlineExceeded { .. }));
    assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_is_not_hit_by_fast_provider() {
    let orch = orchestrator();
    orch.register_provider(ScriptedProvider::new("a").into_arc());

    let response = orch
        .execute_with_deadline(&request(), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(response.provider, "a");
}

#[tokio::test(start_paused = true)]
async fn test_deadline_cutting_the_only_attempt_is_reported_as_deadline() {
    let orch = Orchestrator::new(
        Arc::new(ResultCache::new(100, Duration::from_secs(300))),
        RetryPolicy::no_retry(),
        Duration::from_secs(120),
    );
    let a = ScriptedProvider::new("a")
        .always(Step::Stall(Duration::from_secs(10)))
        .into_arc();
    orch.register_provider(a.clone());

    let err = orch
        .execute_with_deadline(&request(), Duration::from_secs(2))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestraError::DeadlineExceeded { elapsed_ms: 2000 }));
    assert_eq!(a.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_attempts_count_as_provider_failures() {
    let orch = orchestrator_with_timeout(Duration::from_secs(1));
    let a = ScriptedProvider::new("a")
        .always(Step::Stall(Duration::from_secs(10)))
        .into_arc();
    let b = ScriptedProvider::new("b").into_arc();
    orch.register_provider(a.clone());
    orch.register_provider(b.clone());

    let response = orch.execute_chat_completion(&request()).await.unwrap();

    assert_eq!(response.provider, "b");
    assert_eq!(a.calls(), 3);
    let metrics = a.metrics();
    assert_eq!(metrics.total_requests, 3);
    assert_eq!(metrics.failed_requests, 3);
    assert_eq!(metrics.successful_requests, 0);
    assert!(!a.status().healthy);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_falls_back_without_retrying() {
    let orch = orchestrator();
    let a = ScriptedProvider::failing("a", ErrorKind::Network).into_arc();
    let b = ScriptedProvider::new("b").into_arc();
    let breaker = BreakerConfig {
        enabled: true,
        failure_threshold: 2,
        open_timeout_secs: 60,
        success_threshold: 1,
    };
    orch.register_provider(Arc::new(BreakerProvider::new(a.clone(), &breaker)));
    orch.register_provider(b.clone());

    let response = orch.execute_chat_completion(&request()).await.unwrap();
    assert_eq!(response.provider, "b");
    // The third attempt is refused before reaching the backend
    assert_eq!(a.calls(), 2);
    assert_eq!(a.metrics().failed_requests, 2);

    let response = orch
        .execute_chat_completion(&request().with_max_tokens(8))
        .await
        .unwrap();
    assert_eq!(response.provider, "b");
    assert_eq!(a.calls(), 2);
    assert!(!orch.provider_statuses()["a"].healthy);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_timeout_is_retried() {
    let orch = orchestrator_with_timeout(Duration::from_secs(1));
    let a = ScriptedProvider::new("a")
        .with_script([Step::Stall(Duration::from_secs(5))])
        .into_arc();
    orch.register_provider(a.clone());

    let response = orch.execute_chat_completion(&request()).await.unwrap();

    assert_eq!(response.text, "reply from a");
    assert_eq!(a.calls(), 2);
}

#[tokio::test]
async fn test_active_provider_goes_first() {
    let orch = orchestrator();
    let a = ScriptedProvider::new("a").into_arc();
    let b = ScriptedProvider::new("b").into_arc();
    orch.register_provider(a.clone());
    orch.register_provider(b.clone());

    orch.set_active_provider("b").unwrap();
    assert_eq!(orch.active_provider().as_deref(), Some("b"));
    let response = orch.execute_chat_completion(&request()).await.unwrap();
    assert_eq!(response.provider, "b");
    assert_eq!(a.calls(), 0);

    assert!(matches!(
        orch.set_active_provider("ghost"),
        Err(OrchestraError::NotFound(_))
    ));
    assert_eq!(orch.active_provider().as_deref(), Some("b"));

    orch.clear_active_provider();
    assert!(orch.active_provider().is_none());
}

#[tokio::test]
async fn test_active_provider_falls_back_in_registration_order() {
    let orch = orchestrator();
    let a = ScriptedProvider::new("a").into_arc();
    let b = ScriptedProvider::failing("b", ErrorKind::Rejected).into_arc();
    let c = ScriptedProvider::new("c").into_arc();
    orch.register_provider(a.clone());
    orch.register_provider(b.clone());
    orch.register_provider(c.clone());
    orch.set_active_provider("b").unwrap();

    let response = orch.execute_chat_completion(&request()).await.unwrap();

    assert_eq!(response.provider, "a");
    assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 0));
}

#[tokio::test]
async fn test_unavailable_providers_are_skipped() {
    let orch = orchestrator();
    let a = ScriptedProvider::new("a").unavailable().into_arc();
    let b = ScriptedProvider::new("b").into_arc();
    orch.register_provider(a.clone());
    orch.register_provider(b.clone());

    assert_eq!(orch.available_providers(), vec!["b"]);
    let response = orch.execute_chat_completion(&request()).await.unwrap();
    assert_eq!(response.provider, "b");
    assert_eq!(a.calls(), 0);

    b.set_available(false);
    assert!(matches!(
        orch.execute_chat_completion(&request().with_max_tokens(1)).await,
        Err(OrchestraError::NoProvidersAvailable)
    ));
}

#[tokio::test]
async fn test_empty_orchestrator_has_no_providers() {
    let orch = orchestrator();
    let err = orch.execute_chat_completion(&request()).await.unwrap_err();
    assert!(matches!(err, OrchestraError::NoProvidersAvailable));
    assert!(!err.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn test_execute_with_provider_uses_only_that_provider() {
    let orch = orchestrator();
    let a = ScriptedProvider::failing("a", ErrorKind::Inference).into_arc();
    let b = ScriptedProvider::new("b").into_arc();
    orch.register_provider(a.clone());
    orch.register_provider(b.clone());

    let err = orch.execute_with_provider(&request(), "a").await.unwrap_err();
    let OrchestraError::AllProvidersFailed { failures } = err else {
        panic!("expected AllProvidersFailed");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].attempts, 3);
    assert_eq!(b.calls(), 0);

    let response = orch.execute_with_provider(&request(), "b").await.unwrap();
    assert_eq!(response.provider, "b");

    assert!(matches!(
        orch.execute_with_provider(&request(), "ghost").await,
        Err(OrchestraError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_statuses_follow_registration_order() {
    let orch = orchestrator();
    orch.register_provider(ScriptedProvider::new("z").into_arc());
    orch.register_provider(ScriptedProvider::new("a").unavailable().into_arc());

    let statuses = orch.provider_statuses();
    let ids: Vec<&str> = statuses.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["z", "a"]);
    assert!(statuses["z"].available);
    assert!(!statuses["a"].available);
    assert!(statuses["a"].healthy);
}
