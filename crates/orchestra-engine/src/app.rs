//! Composition root
//!
//! [`Orchestra`] owns the single registry value and wires it, the cache and
//! the configured providers into an orchestrator and a maintenance scheduler.

use crate::maintenance::{MaintenanceHandle, MaintenanceReport, MaintenanceScheduler};
use crate::orchestrator::Orchestrator;
use orchestra_core::{OrchestraConfig, Result};
use orchestra_models::{ModelLoader, ModelRegistry, ReferenceLoader};
use orchestra_provider::{BreakerProvider, LocalModelProvider, Provider, RemoteProvider};
use std::sync::Arc;

/// Fully wired system
#[derive(Debug)]
pub struct Orchestra {
    config: OrchestraConfig,
    registry: Arc<ModelRegistry>,
    orchestrator: Arc<Orchestrator>,
    scheduler: Arc<MaintenanceScheduler>,
    maintenance: Option<MaintenanceHandle>,
}

impl Orchestra {
    /// Build with the reference runtime
    ///
    /// # Errors
    /// - `OrchestraError::Configuration` on invalid configuration or an
    ///   unknown active provider
    /// - `OrchestraError::Io` if the model directory cannot be scanned
    pub fn build(config: OrchestraConfig) -> Result<Self> {
        let loader = Arc::new(ReferenceLoader::new(config.registry.memory_overhead_factor));
        Self::with_loader(config, loader)
    }

    /// Build with a specific runtime binding
    ///
    /// # Errors
    /// - as [`Self::build`]
    pub fn with_loader(config: OrchestraConfig, loader: Arc<dyn ModelLoader>) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ModelRegistry::from_config(&config.registry, loader));
        if config.registry.scan_on_startup {
            registry.scan_directory(&config.registry.model_dir)?;
        }

        let orchestrator = Arc::new(Orchestrator::from_config(&config));
        let providers = &config.providers;
        let mut backends: Vec<Arc<dyn Provider>> = Vec::new();
        if providers.local.enabled {
            backends.push(Arc::new(LocalModelProvider::new(
                providers.local.id.clone(),
                Arc::clone(&registry),
            )));
        }
        if providers.router.enabled {
            backends.push(Arc::new(RemoteProvider::router(providers.router.clone())?));
        }
        if providers.daemon.enabled {
            backends.push(Arc::new(RemoteProvider::daemon(providers.daemon.clone())?));
        }
        for backend in backends {
            if config.breaker.enabled {
                orchestrator
                    .register_provider(Arc::new(BreakerProvider::new(backend, &config.breaker)));
            } else {
                orchestrator.register_provider(backend);
            }
        }
        if let Some(active) = &config.active_provider {
            orchestrator.set_active_provider(active).map_err(|e| {
                orchestra_core::OrchestraError::Configuration(format!(
                    "active_provider {active}: {e}"
                ))
            })?;
        }

        let scheduler = Arc::new(MaintenanceScheduler::from_config(
            &config.maintenance,
            Arc::clone(&registry),
            Arc::clone(orchestrator.cache()),
        ));

        tracing::info!(
            "Orchestra ready: {} model(s), providers {:?}",
            registry.list_available().len(),
            orchestrator.available_providers()
        );

        Ok(Self {
            config,
            registry,
            orchestrator,
            scheduler,
            maintenance: None,
        })
    }

    /// Start periodic maintenance if enabled; a no-op when already running
    pub fn start(&mut self) {
        if self.config.maintenance.enabled && self.maintenance.is_none() {
            self.maintenance = Some(Arc::clone(&self.scheduler).spawn());
        }
    }

    /// Run one maintenance pass now
    pub async fn maintain(&self) -> MaintenanceReport {
        self.scheduler.run_once().await
    }

    /// Stop maintenance and unload every model
    pub async fn shutdown(mut self) -> usize {
        if let Some(handle) = self.maintenance.take() {
            handle.shutdown().await;
        }
        let unloaded = self.registry.shutdown_all().await;
        tracing::info!("Orchestra shut down, {} model(s) unloaded", unloaded);
        unloaded
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &OrchestraConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    #[inline]
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    #[inline]
    #[must_use]
    pub fn is_maintaining(&self) -> bool {
        self.maintenance.as_ref().is_some_and(|h| !h.is_finished())
    }
}
