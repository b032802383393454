//! Periodic maintenance
//!
//! Each pass purges expired cache entries, then asks the registry to evict
//! idle models above the high watermark. Passes run on a fixed period; the
//! first one fires one full period after start.

use crate::cache::ResultCache;
use orchestra_core::{MaintenanceConfig, MemoryStats};
use orchestra_models::ModelRegistry;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Outcome of one maintenance pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MaintenanceReport {
    /// Expired cache entries removed
    pub purged: usize,
    /// Models unloaded by cleanup
    pub evicted: usize,
    /// Memory after the pass
    pub memory: MemoryStats,
}

/// Runs cache purge and model cleanup on an interval
#[derive(Debug)]
pub struct MaintenanceScheduler {
    registry: Arc<ModelRegistry>,
    cache: Arc<ResultCache>,
    interval: Duration,
}

impl MaintenanceScheduler {
    #[must_use]
    pub fn new(registry: Arc<ModelRegistry>, cache: Arc<ResultCache>, interval: Duration) -> Self {
        Self {
            registry,
            cache,
            interval,
        }
    }

    #[must_use]
    pub fn from_config(
        config: &MaintenanceConfig,
        registry: Arc<ModelRegistry>,
        cache: Arc<ResultCache>,
    ) -> Self {
        Self::new(registry, cache, config.interval())
    }

    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run a single pass now
    pub async fn run_once(&self) -> MaintenanceReport {
        let purged = self.cache.purge_expired();
        let evicted = self.registry.cleanup_unused().await;
        let memory = self.registry.memory_stats();
        tracing::info!(
            "Maintenance pass: {} cache entries purged, {} model(s) evicted, memory {:.1}%",
            purged,
            evicted,
            memory.usage_percent()
        );
        MaintenanceReport {
            purged,
            evicted,
            memory,
        }
    }

    /// Start the periodic loop on the current runtime
    ///
    /// A pass that panics is logged and the loop keeps going.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> MaintenanceHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let period = self.interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!("Maintenance scheduled every {:?}", period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let scheduler = Arc::clone(&self);
                        let pass = tokio::spawn(async move { scheduler.run_once().await });
                        if let Err(e) = pass.await {
                            tracing::error!("Maintenance pass failed: {}", e);
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Maintenance stopped");
        });

        MaintenanceHandle { stop: stop_tx, task }
    }
}

/// Handle to a running maintenance loop
#[derive(Debug)]
pub struct MaintenanceHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Stop the loop and wait for an in-flight pass to finish
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Maintenance task ended abnormally: {}", e);
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
