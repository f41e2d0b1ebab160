//! Fixed-capacity concurrent cache for pre-hashed 32-bit keys.
//!
//! [`DeltaCache`] maps `u32` keys to opaque [`Handle`]s (non-null 64-bit
//! words, typically pointers to caller-owned records). It is built for
//! read-mostly workloads with many threads:
//!
//! - Lookups are lock-free. They walk a chain optimistically and retry when
//!   a segment version shows that a removal or relocation ran concurrently.
//! - Writers lock one of a power-of-two number of segments, each owning a
//!   contiguous range of home buckets.
//! - Chains are linked with signed 16-bit offsets between 32-byte bucket
//!   records, and new entries prefer free buckets in the same hardware cache
//!   line as their home bucket.
//!
//! Capacity is fixed. When no free bucket is reachable from a key's home
//! bucket, [`DeltaCache::put`] returns [`CacheError::TableFull`] and the cache
//! stays usable.
//!
//! ```
//! use deltacache::{DeltaCache, Handle};
//!
//! let cache = DeltaCache::new(1024, 4, 64, true).unwrap();
//! let handle = Handle::from_raw(0xA).unwrap();
//!
//! assert_eq!(cache.put(1, handle), Ok(None));
//! assert_eq!(cache.get(1), Some(handle));
//! assert_eq!(cache.remove(1), Some(handle));
//! assert!(!cache.contains(1));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bucket;
mod cache;
mod config;
mod error;
mod handle;
mod insert;
mod metrics;
mod remove;
mod segment;
mod sync;
mod table;

pub use bucket::{EMPTY_KEY, MAX_PROBE_DISTANCE};
pub use cache::{DeltaCache, DeltaCacheBuilder};
pub use config::{
    CacheConfig, DEFAULT_CAPACITY, DEFAULT_LINE_SIZE, DEFAULT_OVERFLOW_SPAN, MAX_CAPACITY,
    MAX_LINE_SIZE,
};
pub use error::{CacheError, CacheResult};
pub use handle::Handle;
pub use metrics::{CacheMetrics, MetricsSnapshot};
