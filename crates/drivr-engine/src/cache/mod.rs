//! Read-through caching for slow upstream reads.
//!
//! Keys carry a TTL class, concurrent misses collapse into one upstream
//! load, and writes invalidate through [`ReadThroughCache::invalidate`] so a
//! successful write is always visible to the next read.

mod freshness;
mod key;
mod read_through;

pub use freshness::{CacheRead, Freshness, StalePolicy};
pub use key::{CacheKey, TtlClass};
pub use read_through::{CacheStats, ReadThroughCache};
