//! Read-through cache with single-flight loading.
//!
//! ## Lookup
//!
//! ```text
//! get_or_load → entry within TTL? ── yes ──→ Cached
//!                     │ no
//!                     ↓
//!               join or start the key's in-flight load (one per key)
//!                     ↓
//!               wait, bounded by load_wait_timeout
//!                     ↓
//!          Ok → store (unless invalidated meanwhile) → Fresh
//!          Err/timeout → expired value and ServeStale? → Stale, else error
//! ```
//!
//! ## Invalidation
//!
//! Every invalidation bumps a global epoch and detaches in-flight loads for
//! the affected keys. A load only populates the cache if the epoch it started
//! under is still current when it stores, and that check happens under the
//! entry's shard lock, so a value read before a write never lands after the
//! write's invalidation.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use drivr_core::{SharedClock, to_time_duration};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use time::OffsetDateTime;

use super::freshness::{CacheRead, Freshness, StalePolicy};
use super::key::CacheKey;
use crate::config::CacheConfig;
use crate::error::{EngineError, EngineResult};

type SharedLoad<V> = Shared<BoxFuture<'static, EngineResult<V>>>;

struct Entry<V> {
    value: V,
    loaded_at: OffsetDateTime,
    expires_at: OffsetDateTime,
}

struct Flight<V> {
    id: u64,
    epoch: u64,
    load: SharedLoad<V>,
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStats {
    /// Number of entries currently in the cache, expired ones included.
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Upstream loads started.
    pub loads: u64,
    /// Reads answered with an expired value.
    pub stale_served: u64,
    /// Entries removed by capacity pressure or expiry purges.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// TTL cache in front of a slow source.
pub struct ReadThroughCache<V> {
    entries: DashMap<String, Entry<V>>,
    in_flight: DashMap<String, Flight<V>>,
    config: CacheConfig,
    clock: SharedClock,
    epoch: AtomicU64,
    next_flight: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    stale_served: AtomicU64,
    evictions: AtomicU64,
}

impl<V> ReadThroughCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            config,
            clock,
            epoch: AtomicU64::new(0),
            next_flight: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            stale_served: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Return the cached value for `key`, loading it on a miss.
    ///
    /// Concurrent misses on one key share a single call to `loader`. Load
    /// errors are never cached.
    ///
    /// # Errors
    ///
    /// Returns the loader's error, or `UpstreamUnavailable` if the shared
    /// load does not finish in time, unless `stale` is
    /// [`StalePolicy::ServeStale`] and an expired value is available.
    pub async fn get_or_load<F, Fut>(
        &self,
        key: &CacheKey,
        stale: StalePolicy,
        loader: F,
    ) -> EngineResult<CacheRead<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<V>> + Send + 'static,
    {
        let now = self.clock.now();
        let mut fallback = None;
        if let Some(entry) = self.entries.get(key.name()) {
            if now < entry.expires_at {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(CacheRead::new(
                    entry.value.clone(),
                    Freshness::Cached,
                    entry.loaded_at,
                ));
            }
            if stale == StalePolicy::ServeStale {
                fallback = Some((entry.value.clone(), entry.loaded_at));
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let (flight_id, epoch, load) = self.join_or_start(key, loader);
        let wait = self.config.load_wait_timeout;
        match tokio::time::timeout(wait, load).await {
            Ok(Ok(value)) => {
                let loaded_at = self.clock.now();
                if self.detach(key, flight_id) {
                    self.store(key, value.clone(), epoch, loaded_at);
                }
                Ok(CacheRead::new(value, Freshness::Fresh, loaded_at))
            }
            Ok(Err(err)) => {
                self.detach(key, flight_id);
                self.fall_back(key, fallback, err)
            }
            Err(_) => {
                self.detach(key, flight_id);
                self.fall_back(
                    key,
                    fallback,
                    EngineError::upstream(format!("load of '{key}' did not finish within {wait:?}")),
                )
            }
        }
    }

    fn join_or_start<F, Fut>(&self, key: &CacheKey, loader: F) -> (u64, u64, SharedLoad<V>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<V>> + Send + 'static,
    {
        match self.in_flight.entry(key.name().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                let flight = occupied.get();
                (flight.id, flight.epoch, flight.load.clone())
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let id = self.next_flight.fetch_add(1, Ordering::SeqCst);
                let epoch = self.epoch.load(Ordering::SeqCst);
                let load = loader().boxed().shared();
                vacant.insert(Flight {
                    id,
                    epoch,
                    load: load.clone(),
                });
                self.loads.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "Cache load started");
                (id, epoch, load)
            }
        }
    }

    /// Remove the flight record if it is still ours. Only the caller that
    /// removes it may store the result.
    fn detach(&self, key: &CacheKey, flight_id: u64) -> bool {
        self.in_flight
            .remove_if(key.name(), |_, flight| flight.id == flight_id)
            .is_some()
    }

    fn store(&self, key: &CacheKey, value: V, epoch: u64, loaded_at: OffsetDateTime) {
        if self.entries.len() >= self.config.max_entries && !self.entries.contains_key(key.name())
        {
            self.evict_oldest_quarter();
        }

        let ttl = to_time_duration(key.class().ttl(&self.config));
        let slot = self.entries.entry(key.name().to_string());
        if self.epoch.load(Ordering::SeqCst) != epoch {
            tracing::debug!(key = %key, "Discarding load superseded by invalidation");
            return;
        }
        slot.insert(Entry {
            value,
            loaded_at,
            expires_at: loaded_at.saturating_add(ttl),
        });
    }

    fn fall_back(
        &self,
        key: &CacheKey,
        fallback: Option<(V, OffsetDateTime)>,
        err: EngineError,
    ) -> EngineResult<CacheRead<V>> {
        match fallback {
            Some((value, loaded_at)) => {
                self.stale_served.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %err, "Serving stale value after failed reload");
                Ok(CacheRead::new(value, Freshness::Stale, loaded_at))
            }
            None => Err(err),
        }
    }

    fn evict_oldest_quarter(&self) {
        let mut ages: Vec<(String, OffsetDateTime)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.loaded_at))
            .collect();
        ages.sort_by_key(|(_, at)| *at);

        let count = (ages.len() / 4).max(1);
        let mut removed = 0u64;
        for (key, _) in ages.into_iter().take(count) {
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        self.evictions.fetch_add(removed, Ordering::Relaxed);
        tracing::debug!(removed, "Cache over capacity, evicted oldest entries");
    }

    /// Remove `key` and detach any in-flight load for it.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.in_flight.remove(key.name());
        self.entries.remove(key.name()).is_some()
    }

    /// Remove every key starting with `prefix`. Returns the number of
    /// entries removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.in_flight.retain(|k, _| !k.starts_with(prefix));
        let mut removed = 0usize;
        self.entries.retain(|k, _| {
            if k.starts_with(prefix) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Drop entries that are past both their TTL and the stale grace period.
    pub fn purge_expired(&self) -> usize {
        let cutoff = self
            .clock
            .now()
            .saturating_sub(to_time_duration(self.config.stale_grace));
        let mut removed = 0usize;
        self.entries.retain(|_, entry| {
            if entry.expires_at <= cutoff {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.in_flight.clear();
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
