//! Opaque value handle stored alongside each key.
//!
//! The cache never owns or dereferences what a `Handle` refers to. Callers
//! decide what the 64 bits mean: an index into their own storage, a packed
//! location, or the address of an allocation they manage themselves.

use std::fmt;
use std::num::NonZeroU64;
use std::ptr::NonNull;

/// Opaque, non-zero 64-bit value handle.
///
/// Zero is reserved as the empty sentinel of a bucket's data field, which is
/// why a handle can never be zero.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(NonZeroU64);

impl Handle {
    /// Create a handle from a non-zero raw value.
    #[inline]
    pub const fn new(raw: NonZeroU64) -> Self {
        Self(raw)
    }

    /// Create a handle from a raw value, returning `None` for zero.
    #[inline]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// Get the raw 64-bit value.
    #[inline]
    pub const fn as_raw(&self) -> u64 {
        self.0.get()
    }

    /// Create a handle from the address of a caller-owned allocation.
    ///
    /// The pointer's provenance is exposed so [`Handle::as_ptr`] can recover a
    /// usable pointer. Ownership stays with the caller.
    #[inline]
    pub fn from_ptr<T>(ptr: NonNull<T>) -> Self {
        let addr = ptr.as_ptr().expose_provenance() as u64;
        // a NonNull address is never zero
        Self(NonZeroU64::new(addr).unwrap_or(NonZeroU64::MIN))
    }

    /// Reinterpret the handle as a pointer previously passed to
    /// [`Handle::from_ptr`].
    ///
    /// Dereferencing the result is only sound while the caller still owns the
    /// allocation.
    #[inline]
    pub fn as_ptr<T>(&self) -> *mut T {
        std::ptr::with_exposed_provenance_mut(self.0.get() as usize)
    }

    /// Encode for storage in a bucket's data field.
    #[inline]
    pub(crate) const fn to_bits(handle: Option<Handle>) -> u64 {
        match handle {
            Some(handle) => handle.0.get(),
            None => 0,
        }
    }

    /// Decode a bucket's data field.
    #[inline]
    pub(crate) const fn from_bits(bits: u64) -> Option<Handle> {
        Self::from_raw(bits)
    }
}

impl From<NonZeroU64> for Handle {
    fn from(raw: NonZeroU64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle(0x{:X})", self.0.get())
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}
