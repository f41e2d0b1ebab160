//! Error types for cache operations.

use std::fmt;

/// Errors that can occur during cache construction or insertion.
///
/// Misses and duplicate inserts are not errors: lookups and removals report
/// absence with `None`/`false`, and a duplicate `put` returns the value that
/// is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// No free bucket exists within link range of the key's home bucket.
    ///
    /// The table cannot grow, so the caller has to reject the insert or
    /// rebuild the cache out of band.
    TableFull,

    /// The key equals the empty sentinel (`u32::MAX`) and cannot be stored.
    ReservedKey,

    /// Capacity is zero or larger than the 32-bit key space can address.
    InvalidCapacity,

    /// Line size is not a power of two at least one bucket record wide.
    InvalidLineSize,

    /// Overflow region is too large for the bucket array to be indexed.
    InvalidOverflowSpan,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TableFull => write!(f, "no free bucket within range of home bucket"),
            Self::ReservedKey => write!(f, "key is reserved as the empty sentinel"),
            Self::InvalidCapacity => write!(f, "invalid capacity (must be 1..=2^31)"),
            Self::InvalidLineSize => {
                write!(f, "invalid line size (power of two, at least one bucket)")
            }
            Self::InvalidOverflowSpan => write!(f, "invalid overflow span"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
