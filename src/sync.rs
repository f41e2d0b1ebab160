//! Synchronization primitives with optional loom support.
//!
//! Bucket records and segments are built from these atomics so the read and
//! write protocols can be model checked with loom while production builds use
//! the std atomics directly.

#[cfg(not(feature = "loom"))]
pub use std::sync::atomic::{AtomicI16, AtomicU32, AtomicU64, Ordering, fence};

#[cfg(feature = "loom")]
pub use loom::sync::atomic::{AtomicI16, AtomicU32, AtomicU64, Ordering, fence};

/// Spin loop hint for busy waiting.
///
/// Under loom this yields instead, otherwise a spinning thread would never
/// let the model scheduler run the thread it is waiting on.
#[inline]
pub fn spin_loop() {
    #[cfg(not(feature = "loom"))]
    std::hint::spin_loop();

    #[cfg(feature = "loom")]
    loom::thread::yield_now();
}
