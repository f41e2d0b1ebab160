//! Benchmark metrics.
//!
//! Cache health counters (read retries, relocations, full-table inserts) come
//! from [`deltacache::CacheMetrics`]; these cover what the workload sees.

use metriken::{AtomicHistogram, Counter, metric};

// Operation counters
#[metric(name = "get_count", description = "Total GET operations")]
pub static GET_COUNT: Counter = Counter::new();

#[metric(name = "put_count", description = "Total PUT operations")]
pub static PUT_COUNT: Counter = Counter::new();

#[metric(name = "remove_count", description = "Total REMOVE operations")]
pub static REMOVE_COUNT: Counter = Counter::new();

#[metric(name = "completed_count", description = "Total completed operations")]
pub static COMPLETED_COUNT: Counter = Counter::new();

#[metric(
    name = "put_exists",
    description = "PUT operations that found the key already present"
)]
pub static PUT_EXISTS: Counter = Counter::new();

#[metric(name = "put_errors", description = "PUT operations rejected by the cache")]
pub static PUT_ERRORS: Counter = Counter::new();

#[metric(name = "remove_hits", description = "REMOVE operations that found the key")]
pub static REMOVE_HITS: Counter = Counter::new();

// Cache counters
#[metric(name = "cache_hits", description = "Total cache hits")]
pub static CACHE_HITS: Counter = Counter::new();

#[metric(name = "cache_misses", description = "Total cache misses")]
pub static CACHE_MISSES: Counter = Counter::new();

// Latency histograms
#[metric(
    name = "response_latency",
    description = "Response latency histogram (nanoseconds)"
)]
pub static RESPONSE_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

#[metric(
    name = "get_latency",
    description = "GET latency histogram (nanoseconds)"
)]
pub static GET_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

#[metric(
    name = "put_latency",
    description = "PUT latency histogram (nanoseconds)"
)]
pub static PUT_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

#[metric(
    name = "remove_latency",
    description = "REMOVE latency histogram (nanoseconds)"
)]
pub static REMOVE_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);
