//! Freshness metadata carried by cache reads.
//!
//! Callers opt in to stale data explicitly with [`StalePolicy::ServeStale`],
//! and every read reports where its value came from.

use serde::Serialize;
use time::OffsetDateTime;

/// What a read may return when a reload fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StalePolicy {
    /// Surface the load error.
    #[default]
    Reject,
    /// Fall back to an expired value, marked [`Freshness::Stale`].
    ServeStale,
}

/// Where a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Loaded from the source for this read.
    Fresh,
    /// Served from cache within its TTL.
    Cached,
    /// Served from cache past its TTL because the reload failed.
    Stale,
}

/// Result of a cache read.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    freshness: Freshness,
    loaded_at: OffsetDateTime,
}

impl<T> CacheRead<T> {
    pub fn new(value: T, freshness: Freshness, loaded_at: OffsetDateTime) -> Self {
        Self {
            value,
            freshness,
            loaded_at,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    /// When the value was fetched from the source.
    pub fn loaded_at(&self) -> OffsetDateTime {
        self.loaded_at
    }

    pub fn is_stale(&self) -> bool {
        self.freshness == Freshness::Stale
    }

    /// Transform the value, keeping the metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheRead<U> {
        CacheRead {
            value: f(self.value),
            freshness: self.freshness,
            loaded_at: self.loaded_at,
        }
    }
}
