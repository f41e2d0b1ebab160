//! Cache configuration and the table geometry derived from it.

use serde::Deserialize;

use crate::bucket::RECORD_SIZE;
use crate::error::{CacheError, CacheResult};

/// Default number of home buckets.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Default hardware cache line size in bytes.
pub const DEFAULT_LINE_SIZE: usize = 64;

/// Default number of buckets past the home range reserved for overflow.
pub const DEFAULT_OVERFLOW_SPAN: usize = 4096;

/// Largest accepted capacity. Home buckets are addressed by the low bits of
/// a 32-bit key.
pub const MAX_CAPACITY: usize = 1 << 31;

/// Largest accepted line size in bytes.
pub const MAX_LINE_SIZE: usize = 4096;

/// Construction parameters for a [`DeltaCache`](crate::DeltaCache).
///
/// Deserializable so it can be embedded in a TOML file:
///
/// ```toml
/// capacity = 65536
/// threads = 8
/// line_size = 64
/// cacheline_placement = true
/// overflow_span = 4096
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Requested number of home buckets, rounded up to a power of two.
    pub capacity: usize,

    /// Expected number of concurrent writers. Rounded up to a power of two
    /// and used as the segment count (capped at the rounded capacity).
    pub threads: usize,

    /// Cache line size in bytes. Determines how many buckets form a group.
    pub line_size: usize,

    /// Prefer free buckets in the home bucket's cache-line group and
    /// defragment groups after removals.
    pub cacheline_placement: bool,

    /// Number of extra buckets past the home range that only host overflow
    /// entries. At most `i16::MAX`; anything beyond that is unreachable.
    pub overflow_span: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            threads: 1,
            line_size: DEFAULT_LINE_SIZE,
            cacheline_placement: true,
            overflow_span: DEFAULT_OVERFLOW_SPAN,
        }
    }
}

impl CacheConfig {
    /// Validate the configuration and derive the table geometry.
    pub(crate) fn geometry(&self) -> CacheResult<Geometry> {
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return Err(CacheError::InvalidCapacity);
        }
        if !self.line_size.is_power_of_two()
            || self.line_size < RECORD_SIZE
            || self.line_size > MAX_LINE_SIZE
        {
            return Err(CacheError::InvalidLineSize);
        }
        if self.overflow_span > i16::MAX as usize {
            return Err(CacheError::InvalidOverflowSpan);
        }

        let capacity = self.capacity.next_power_of_two();
        let num_segments = self.threads.clamp(1, capacity).next_power_of_two();

        let bucket_bits = capacity.trailing_zeros();
        let segment_bits = num_segments.trailing_zeros();

        Ok(Geometry {
            capacity,
            num_segments,
            segment_mask: (num_segments - 1) as u32,
            segment_shift: bucket_bits - segment_bits,
            line_span: self.line_size / RECORD_SIZE,
            overflow_span: self.overflow_span,
        })
    }
}

/// Sizes and masks derived from a validated [`CacheConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Geometry {
    pub capacity: usize,
    pub num_segments: usize,
    pub segment_mask: u32,
    /// Shift that leaves the top `log2(num_segments)` bits of a home bucket
    /// index, so each segment owns a contiguous range of home buckets.
    pub segment_shift: u32,
    pub line_span: usize,
    pub overflow_span: usize,
}
