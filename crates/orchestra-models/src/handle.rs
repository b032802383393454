//! Resident model handles
//!
//! A [`LoadedModel`] is created only by the registry after a successful load
//! and handed out as a shared [`ModelHandle`] for inference. Recency is
//! tracked with a logical clock so eviction order is total even when two
//! touches land in the same instant.

use crate::loader::NativeSession;
use chrono::{DateTime, Utc};
use orchestra_core::{HandleId, ModelDescriptor, ModelId};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared reference to a resident model
pub type ModelHandle = Arc<LoadedModel>;

/// Monotonic usage counter shared by every handle of one registry
#[derive(Debug, Default)]
pub struct UsageClock {
    tick: AtomicU64,
}

impl UsageClock {
    /// Next tick, strictly greater than every previous one
    #[inline]
    pub fn advance(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Snapshot of a resident model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedModelInfo {
    pub model_id: ModelId,
    pub handle_id: HandleId,
    pub resident_bytes: u64,
    pub loaded_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub last_used_tick: u64,
}

/// A live, resident model instance
#[derive(Debug)]
pub struct LoadedModel {
    handle_id: HandleId,
    descriptor: ModelDescriptor,
    session: Arc<dyn NativeSession>,
    resident_bytes: u64,
    loaded_at: DateTime<Utc>,
    last_used_tick: AtomicU64,
    last_used_at: Mutex<DateTime<Utc>>,
    clock: Arc<UsageClock>,
}

impl LoadedModel {
    pub(crate) fn new(
        descriptor: ModelDescriptor,
        session: Box<dyn NativeSession>,
        resident_bytes: u64,
        clock: Arc<UsageClock>,
    ) -> Self {
        let now = Utc::now();
        Self {
            handle_id: HandleId::new(),
            descriptor,
            session: Arc::from(session),
            resident_bytes,
            loaded_at: now,
            last_used_tick: AtomicU64::new(clock.advance()),
            last_used_at: Mutex::new(now),
            clock,
        }
    }

    /// Mark as used now
    pub fn touch(&self) {
        self.last_used_tick
            .store(self.clock.advance(), Ordering::SeqCst);
        *self.last_used_at.lock() = Utc::now();
    }

    #[inline]
    #[must_use]
    pub fn handle_id(&self) -> HandleId {
        self.handle_id
    }

    #[inline]
    #[must_use]
    pub fn model_id(&self) -> &ModelId {
        &self.descriptor.id
    }

    /// Descriptor as of load time
    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    #[inline]
    #[must_use]
    pub fn resident_bytes(&self) -> u64 {
        self.resident_bytes
    }

    #[inline]
    #[must_use]
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Logical recency; larger is more recent
    #[inline]
    #[must_use]
    pub fn last_used_tick(&self) -> u64 {
        self.last_used_tick.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn last_used_at(&self) -> DateTime<Utc> {
        *self.last_used_at.lock()
    }

    pub(crate) fn session(&self) -> Arc<dyn NativeSession> {
        Arc::clone(&self.session)
    }

    /// Detached copy for reporting
    #[must_use]
    pub fn info(&self) -> LoadedModelInfo {
        LoadedModelInfo {
            model_id: self.descriptor.id.clone(),
            handle_id: self.handle_id,
            resident_bytes: self.resident_bytes,
            loaded_at: self.loaded_at,
            last_used_at: self.last_used_at(),
            last_used_tick: self.last_used_tick(),
        }
    }
}
