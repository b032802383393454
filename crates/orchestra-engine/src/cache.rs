//! Fingerprinted completion cache
//!
//! Responses are memoized per provider under a [`Fingerprint`] of everything
//! that influences the output. Entries expire after a fixed TTL; when the
//! cache is full, the oldest tenth (by insertion) is dropped before the new
//! entry goes in.

use dashmap::DashMap;
use metrics::counter;
use orchestra_core::{CacheConfig, CompletionRequest, CompletionResponse};
use serde::Serialize;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Fraction of entries dropped when the cache is full
const EVICTION_DIVISOR: usize = 10;

/// Model component used when the request leaves the model to the provider
const DEFAULT_MODEL: &str = "<default>";

/// Blake3 digest of a provider, model, prompt and decoding parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint a request as it would be sent to `provider`
    #[must_use]
    pub fn of(provider: &str, request: &CompletionRequest) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in [
            provider,
            request.model.as_deref().unwrap_or(DEFAULT_MODEL),
            request.prompt.as_str(),
        ] {
            // Length prefix keeps ("ab", "c") and ("a", "bc") apart
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        hasher.update(&request.max_tokens.to_le_bytes());
        hasher.update(&request.temperature.to_bits().to_le_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 16 hex chars, for logs
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: CompletionResponse,
    inserted_at: Instant,
    sequence: u64,
}

/// Cache counters and size
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    /// Hits over lookups, 0.0 before the first lookup
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Concurrent TTL cache of completion responses
#[derive(Debug)]
pub struct ResultCache {
    entries: DashMap<Fingerprint, CacheEntry>,
    enabled: bool,
    ttl: Duration,
    capacity: usize,
    sequence: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl ResultCache {
    /// Create cache holding at most `capacity` entries for `ttl` each
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity),
            enabled: true,
            ttl,
            capacity: capacity.max(1),
            sequence: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            ..Self::new(config.capacity, config.ttl())
        }
    }

    /// Cache that never stores anything
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(1, Duration::ZERO)
        }
    }

    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Look up a live entry; the returned copy is flagged `cached`
    ///
    /// An expired entry counts as a miss and is dropped on the spot.
    #[must_use]
    pub fn get(&self, key: &Fingerprint) -> Option<CompletionResponse> {
        if !self.enabled {
            return None;
        }

        let expired = match self.entries.get(key) {
            Some(entry) if !self.is_expired(&entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!("orchestra_cache_hits_total").increment(1);
                let mut response = entry.response.clone();
                response.cached = true;
                return Some(response);
            }
            Some(_) => true,
            None => false,
        };

        if expired && self.entries.remove_if(key, |_, e| self.is_expired(e)).is_some() {
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!("orchestra_cache_misses_total").increment(1);
        None
    }

    /// Store a response, evicting the oldest entries first if full
    pub fn insert(&self, key: Fingerprint, mut response: CompletionResponse) {
        if !self.enabled {
            return;
        }
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        response.cached = false;
        self.entries.insert(
            key,
            CacheEntry {
                response,
                inserted_at: Instant::now(),
                sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            },
        );
    }

    fn evict_oldest(&self) {
        let mut by_age: Vec<(u64, Fingerprint)> = self
            .entries
            .iter()
            .map(|e| (e.value().sequence, *e.key()))
            .collect();
        by_age.sort_unstable_by_key(|(seq, _)| *seq);

        let count = (by_age.len() / EVICTION_DIVISOR).max(1);
        let mut evicted = 0u64;
        for (_, key) in by_age.into_iter().take(count) {
            if self.entries.remove(&key).is_some() {
                evicted += 1;
            }
        }
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        counter!("orchestra_cache_evictions_total").increment(evicted);
        tracing::debug!("Cache full, evicted {} oldest entries", evicted);
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !self.is_expired(e));
        let purged = before.saturating_sub(self.entries.len());
        self.expirations.fetch_add(purged as u64, Ordering::Relaxed);
        if purged > 0 {
            tracing::debug!("Purged {} expired cache entries", purged);
        }
        purged
    }

    /// Remove everything; counters are kept
    pub fn clear(&self) {
        self.entries.clear();
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        entry.inserted_at.elapsed() >= self.ttl
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}
