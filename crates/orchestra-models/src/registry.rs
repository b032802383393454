//! Model registry
//!
//! Single source of truth for which models exist and which are resident:
//! - Registration by name or directory scan
//! - Two-phase load and unload (status flips under the write lock, native
//!   work runs outside it on the blocking pool)
//! - Memory accounting against a ceiling
//! - LRU cleanup between a high and a low watermark
//!
//! The descriptor map is guarded by one `parking_lot::RwLock` that is never
//! held across an `.await`.

use crate::handle::{LoadedModel, LoadedModelInfo, ModelHandle, UsageClock};
use crate::lifecycle::validate_transition;
use crate::loader::{LoadedSession, ModelLoader};
use crate::memory;
use indexmap::IndexMap;
use metrics::{counter, gauge};
use orchestra_core::{
    Capability, MemoryStats, ModelDescriptor, ModelId, ModelMetadata, ModelStatus,
    OrchestraError, RegistryConfig, Result,
};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Debug)]
struct Entry {
    descriptor: ModelDescriptor,
    handle: Option<ModelHandle>,
}

impl Entry {
    fn transition(&mut self, to: ModelStatus) -> Result<()> {
        validate_transition(self.descriptor.id.as_str(), self.descriptor.status, to)?;
        self.descriptor.status = to;
        Ok(())
    }
}

/// Registry of local models
#[derive(Debug)]
pub struct ModelRegistry {
    models: RwLock<IndexMap<ModelId, Entry>>,
    loader: Arc<dyn ModelLoader>,
    clock: Arc<UsageClock>,
    max_bytes: u64,
    high_watermark: f64,
    low_watermark: f64,
    extensions: Vec<String>,
}

impl ModelRegistry {
    /// Create registry with a fixed memory ceiling and default watermarks
    #[must_use]
    pub fn new(loader: Arc<dyn ModelLoader>, max_bytes: u64) -> Self {
        let defaults = RegistryConfig::default();
        Self {
            models: RwLock::new(IndexMap::new()),
            loader,
            clock: Arc::new(UsageClock::default()),
            max_bytes,
            high_watermark: defaults.high_watermark,
            low_watermark: defaults.low_watermark,
            extensions: defaults.extensions,
        }
    }

    /// Create registry from configuration, detecting system memory if needed
    #[must_use]
    pub fn from_config(config: &RegistryConfig, loader: Arc<dyn ModelLoader>) -> Self {
        Self::new(loader, memory::resolve_ceiling(config))
            .with_watermarks(config.high_watermark, config.low_watermark)
            .with_extensions(config.extensions.clone())
    }

    /// With eviction watermarks as usage ratios
    #[inline]
    #[must_use]
    pub fn with_watermarks(mut self, high: f64, low: f64) -> Self {
        self.high_watermark = high;
        self.low_watermark = low;
        self
    }

    /// With model file extensions recognised by `scan_directory`
    #[inline]
    #[must_use]
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Register a model file, inspecting it for metadata
    ///
    /// # Errors
    /// - `OrchestraError::NotFound` if the file does not exist
    /// - `OrchestraError::AlreadyRegistered` if the name collides
    pub fn register(&self, name: &str, path: impl AsRef<Path>) -> Result<ModelDescriptor> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(OrchestraError::NotFound(format!(
                "model file {}",
                path.display()
            )));
        }
        let id = ModelId::from_name(name);
        if self.models.read().contains_key(&id) {
            return Err(OrchestraError::AlreadyRegistered(name.to_string()));
        }
        let metadata = self.loader.inspect(path)?;
        self.insert(ModelDescriptor::new(name, path, metadata))
    }

    /// Register a model with caller-supplied metadata
    ///
    /// # Errors
    /// - `OrchestraError::NotFound` if the file does not exist
    /// - `OrchestraError::AlreadyRegistered` if the name collides
    pub fn register_with_metadata(
        &self,
        name: &str,
        path: impl AsRef<Path>,
        metadata: ModelMetadata,
    ) -> Result<ModelDescriptor> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(OrchestraError::NotFound(format!(
                "model file {}",
                path.display()
            )));
        }
        self.insert(ModelDescriptor::new(name, path, metadata))
    }

    fn insert(&self, descriptor: ModelDescriptor) -> Result<ModelDescriptor> {
        let mut models = self.models.write();
        if models.contains_key(&descriptor.id) {
            return Err(OrchestraError::AlreadyRegistered(descriptor.name));
        }
        tracing::info!(
            "Registered model {} ({} bytes, {:?})",
            descriptor.id,
            descriptor.size_bytes,
            descriptor.capabilities
        );
        models.insert(
            descriptor.id.clone(),
            Entry {
                descriptor: descriptor.clone(),
                handle: None,
            },
        );
        Ok(descriptor)
    }

    /// Remove a model that is not resident
    ///
    /// # Errors
    /// - `OrchestraError::NotFound` for an unknown id
    /// - `OrchestraError::Busy` if the model is loaded or transitioning
    pub fn unregister(&self, id: &ModelId) -> Result<ModelDescriptor> {
        let mut models = self.models.write();
        let entry = models
            .get(id)
            .ok_or_else(|| OrchestraError::model_not_found(id))?;
        let status = entry.descriptor.status;
        if status == ModelStatus::Loaded || status.is_transitioning() {
            return Err(OrchestraError::Busy {
                id: id.to_string(),
                status,
            });
        }
        let entry = models
            .shift_remove(id)
            .ok_or_else(|| OrchestraError::model_not_found(id))?;
        tracing::info!("Unregistered model {}", id);
        Ok(entry.descriptor)
    }

    /// Register every model file in a directory, creating it if absent
    ///
    /// Files that fail to register are logged and skipped; names already
    /// registered are left untouched.
    ///
    /// # Errors
    /// - `OrchestraError::Io` if the directory cannot be created or read
    pub fn scan_directory(&self, dir: impl AsRef<Path>) -> Result<Vec<ModelDescriptor>> {
        let dir = dir.as_ref();
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            tracing::info!("Created model directory {}", dir.display());
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file() && self.has_model_extension(p))
            .collect();
        files.sort();

        let mut registered = Vec::new();
        for path in files {
            let Some(name) = ModelId::name_from_path(&path) else {
                continue;
            };
            if self.models.read().contains_key(&ModelId::from_name(&name)) {
                tracing::debug!("Skipping already registered model {}", name);
                continue;
            }
            match self.register(&name, &path) {
                Ok(descriptor) => registered.push(descriptor),
                Err(e) => tracing::warn!("Failed to register {}: {}", path.display(), e),
            }
        }

        tracing::info!(
            "Scanned {}: {} new model(s)",
            dir.display(),
            registered.len()
        );
        Ok(registered)
    }

    fn has_model_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
    }

    /// Load a model, or return its existing handle
    ///
    /// # Errors
    /// - `OrchestraError::NotFound` for an unknown id
    /// - `OrchestraError::Busy` while a load or unload is in flight
    /// - the loader's error when the native load fails; status becomes `Failed`
    pub async fn load(&self, id: &ModelId) -> Result<ModelHandle> {
        let descriptor = {
            let mut models = self.models.write();
            let entry = models
                .get_mut(id)
                .ok_or_else(|| OrchestraError::model_not_found(id))?;

            match (entry.descriptor.status, &entry.handle) {
                (ModelStatus::Loaded, Some(handle)) => {
                    handle.touch();
                    return Ok(Arc::clone(handle));
                }
                (status, _) if status.is_transitioning() => {
                    return Err(OrchestraError::Busy {
                        id: id.to_string(),
                        status,
                    });
                }
                _ => {}
            }

            entry.transition(ModelStatus::Loading)?;
            entry.descriptor.clone()
        };

        tracing::info!("Loading model {} from {}", id, descriptor.path.display());
        let guard = TransitionGuard::new(self, id);

        let loader = Arc::clone(&self.loader);
        let native = descriptor.clone();
        let (tx, rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            // A cancelled load leaves nobody to install the session
            if let Err(Ok(orphan)) = tx.send(loader.load(&native)) {
                tracing::warn!("Load of {} was abandoned, closing its session", native.id);
                if let Err(e) = orphan.session.close() {
                    tracing::warn!("Closing abandoned session of {} failed: {}", native.id, e);
                }
            }
        });
        let outcome = rx
            .await
            .map_err(|_| OrchestraError::Inference("load task ended without a result".to_string()))
            .and_then(|r| r);

        guard.disarm();
        self.install(id, descriptor, outcome)
    }

    fn install(
        &self,
        id: &ModelId,
        mut descriptor: ModelDescriptor,
        outcome: Result<LoadedSession>,
    ) -> Result<ModelHandle> {
        let mut models = self.models.write();
        let Some(entry) = models.get_mut(id) else {
            return Err(OrchestraError::model_not_found(id));
        };

        match outcome {
            Ok(loaded) => {
                entry.transition(ModelStatus::Loaded)?;
                entry.descriptor.last_error = None;
                descriptor.status = ModelStatus::Loaded;
                descriptor.last_error = None;

                let handle = Arc::new(LoadedModel::new(
                    descriptor,
                    loaded.session,
                    loaded.resident_bytes,
                    Arc::clone(&self.clock),
                ));
                entry.handle = Some(Arc::clone(&handle));

                tracing::info!(
                    "Loaded model {} ({} bytes resident, handle {})",
                    id,
                    handle.resident_bytes(),
                    handle.handle_id()
                );
                counter!("orchestra_models_loaded_total").increment(1);
                Self::publish_resident(&models);
                Ok(handle)
            }
            Err(e) => {
                entry.transition(ModelStatus::Failed)?;
                entry.descriptor.last_error = Some(e.to_string());
                tracing::error!("Failed to load model {}: {}", id, e);
                counter!("orchestra_model_load_failures_total").increment(1);
                Err(e)
            }
        }
    }

    /// Unload a resident model
    ///
    /// Returns `false` if the model was not loaded. A failing native close is
    /// logged, marks the model `Failed`, and still releases the slot.
    ///
    /// # Errors
    /// - `OrchestraError::NotFound` for an unknown id
    /// - `OrchestraError::Busy` while a load or unload is in flight
    pub async fn unload(&self, id: &ModelId) -> Result<bool> {
        let handle = {
            let mut models = self.models.write();
            let entry = models
                .get_mut(id)
                .ok_or_else(|| OrchestraError::model_not_found(id))?;

            match entry.descriptor.status {
                ModelStatus::Loaded => {}
                status if status.is_transitioning() => {
                    return Err(OrchestraError::Busy {
                        id: id.to_string(),
                        status,
                    });
                }
                _ => return Ok(false),
            }

            entry.transition(ModelStatus::Unloading)?;
            let handle = entry.handle.take();
            Self::publish_resident(&models);
            handle
        };

        let guard = TransitionGuard::new(self, id);
        let close_result = match handle {
            Some(handle) => {
                let session = handle.session();
                tokio::task::spawn_blocking(move || session.close())
                    .await
                    .map_err(|e| OrchestraError::Inference(format!("close task failed: {e}")))
                    .and_then(|r| r)
            }
            None => Ok(()),
        };
        guard.disarm();

        let mut models = self.models.write();
        if let Some(entry) = models.get_mut(id) {
            match close_result {
                Ok(()) => {
                    entry.transition(ModelStatus::Available)?;
                    tracing::info!("Unloaded model {}", id);
                }
                Err(e) => {
                    entry.transition(ModelStatus::Failed)?;
                    entry.descriptor.last_error = Some(e.to_string());
                    tracing::warn!("Native close of {} failed, slot released: {}", id, e);
                }
            }
        }
        counter!("orchestra_models_unloaded_total").increment(1);
        Ok(true)
    }

    /// Descriptor snapshot
    #[must_use]
    pub fn get(&self, id: &ModelId) -> Option<ModelDescriptor> {
        self.models.read().get(id).map(|e| e.descriptor.clone())
    }

    /// Resident handle, if loaded
    #[must_use]
    pub fn handle(&self, id: &ModelId) -> Option<ModelHandle> {
        self.models.read().get(id).and_then(|e| e.handle.clone())
    }

    /// Resolve a name or id to a descriptor
    #[must_use]
    pub fn resolve(&self, name_or_id: &str) -> Option<ModelDescriptor> {
        let models = self.models.read();
        models
            .get(&ModelId::from_name(name_or_id))
            .or_else(|| models.values().find(|e| e.descriptor.name == name_or_id))
            .map(|e| e.descriptor.clone())
    }

    /// First registered model declaring a capability
    #[must_use]
    pub fn first_capable(&self, capability: Capability) -> Option<ModelDescriptor> {
        self.models
            .read()
            .values()
            .find(|e| e.descriptor.supports(capability))
            .map(|e| e.descriptor.clone())
    }

    /// Snapshot of every registered model, in registration order
    #[must_use]
    pub fn list_available(&self) -> Vec<ModelDescriptor> {
        self.models
            .read()
            .values()
            .map(|e| e.descriptor.clone())
            .collect()
    }

    /// Snapshot of resident models, in registration order
    #[must_use]
    pub fn list_loaded(&self) -> Vec<LoadedModelInfo> {
        self.models
            .read()
            .values()
            .filter_map(|e| e.handle.as_ref().map(|h| h.info()))
            .collect()
    }

    /// Aggregate memory usage of resident models
    #[must_use]
    pub fn memory_stats(&self) -> MemoryStats {
        let models = self.models.read();
        let (used_bytes, loaded_count) = models
            .values()
            .filter_map(|e| e.handle.as_ref())
            .fold((0u64, 0usize), |(bytes, count), h| {
                (bytes.saturating_add(h.resident_bytes()), count + 1)
            });
        MemoryStats {
            used_bytes,
            loaded_count,
            max_bytes: self.max_bytes,
        }
    }

    /// Usage ratio above which cleanup starts evicting
    #[inline]
    #[must_use]
    pub fn high_watermark(&self) -> f64 {
        self.high_watermark
    }

    /// Usage ratio cleanup evicts down to
    #[inline]
    #[must_use]
    pub fn low_watermark(&self) -> f64 {
        self.low_watermark
    }

    /// Evict least recently used models while usage is above the high watermark
    ///
    /// Eviction stops once usage is at or below the low watermark or nothing
    /// evictable remains. Per-model failures are logged and skipped.
    /// Returns the number of models evicted.
    pub async fn cleanup_unused(&self) -> usize {
        let stats = self.memory_stats();
        if stats.usage_ratio() <= self.high_watermark {
            tracing::debug!(
                "Memory usage {:.1}% within limits, no eviction",
                stats.usage_percent()
            );
            return 0;
        }

        tracing::info!(
            "Memory usage {:.1}% above {:.0}% watermark, evicting",
            stats.usage_percent(),
            self.high_watermark * 100.0
        );

        let mut candidates: Vec<(u64, ModelId)> = {
            let models = self.models.read();
            models
                .values()
                .filter_map(|e| e.handle.as_ref())
                .map(|h| (h.last_used_tick(), h.model_id().clone()))
                .collect()
        };
        candidates.sort_by_key(|(tick, _)| *tick);

        let mut evicted = 0;
        for (_, id) in candidates {
            if self.memory_stats().usage_ratio() <= self.low_watermark {
                break;
            }
            match self.unload(&id).await {
                Ok(true) => {
                    evicted += 1;
                    tracing::info!("Evicted model {}", id);
                    counter!("orchestra_models_evicted_total").increment(1);
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("Could not evict model {}: {}", id, e),
            }
        }

        let after = self.memory_stats();
        tracing::info!(
            "Cleanup evicted {} model(s), usage now {:.1}%",
            evicted,
            after.usage_percent()
        );
        evicted
    }

    /// Unload every resident model
    pub async fn shutdown_all(&self) -> usize {
        let ids: Vec<ModelId> = self
            .models
            .read()
            .values()
            .filter(|e| e.handle.is_some())
            .map(|e| e.descriptor.id.clone())
            .collect();

        let mut unloaded = 0;
        for id in ids {
            match self.unload(&id).await {
                Ok(true) => unloaded += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("Shutdown could not unload {}: {}", id, e),
            }
        }
        unloaded
    }

    #[allow(clippy::cast_precision_loss)]
    fn publish_resident(models: &IndexMap<ModelId, Entry>) {
        let bytes: u64 = models
            .values()
            .filter_map(|e| e.handle.as_ref())
            .map(|h| h.resident_bytes())
            .sum();
        gauge!("orchestra_models_resident_bytes").set(bytes as f64);
    }

    fn abandon(&self, id: &ModelId) {
        let mut models = self.models.write();
        if let Some(entry) = models.get_mut(id) {
            if entry.descriptor.status.is_transitioning() {
                let from = entry.descriptor.status;
                entry.descriptor.status = ModelStatus::Failed;
                entry.descriptor.last_error = Some(format!("{from} cancelled"));
                tracing::warn!("Model {} left {} by a cancelled task", id, from);
            }
        }
    }
}

/// Marks a model `Failed` if the task driving its transition is dropped
/// before the second lock phase runs. The native load itself still runs to
/// completion and closes its own session when no one is waiting for it.
struct TransitionGuard<'a> {
    registry: &'a ModelRegistry,
    id: &'a ModelId,
    armed: bool,
}

impl<'a> TransitionGuard<'a> {
    fn new(registry: &'a ModelRegistry, id: &'a ModelId) -> Self {
        Self {
            registry,
            id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.abandon(self.id);
        }
    }
}
