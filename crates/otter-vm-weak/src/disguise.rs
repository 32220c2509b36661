//! Disguised pointers
//!
//! Addresses are stored as their two's-complement negation. The transform is
//! its own inverse, maps null to zero, and keeps the alignment bits of an
//! aligned address clear, while the stored bits no longer look like a
//! pointer into the heap.

use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::marker::PhantomData;

use rustc_hash::FxBuildHasher;

/// Encode an address.
#[inline]
pub const fn disguise(addr: usize) -> usize {
    addr.wrapping_neg()
}

/// Decode a value produced by [`disguise`].
#[inline]
pub const fn undisguise(bits: usize) -> usize {
    bits.wrapping_neg()
}

/// A `*mut T` stored in disguised form.
///
/// Equality and hashing operate on the disguised bits.
#[repr(transparent)]
pub struct DisguisedPtr<T> {
    bits: usize,
    _marker: PhantomData<*mut T>,
}

// SAFETY: DisguisedPtr is an integer. It never dereferences the address it
// encodes; whoever decodes it takes on the usual raw-pointer obligations.
unsafe impl<T> Send for DisguisedPtr<T> {}
unsafe impl<T> Sync for DisguisedPtr<T> {}

impl<T> DisguisedPtr<T> {
    /// The disguised null pointer.
    pub const NULL: Self = Self::from_bits(0);

    /// Disguise a pointer.
    #[inline]
    pub fn new(ptr: *mut T) -> Self {
        Self::from_bits(disguise(ptr.expose_provenance()))
    }

    /// Rebuild from raw disguised bits.
    #[inline]
    pub const fn from_bits(bits: usize) -> Self {
        Self {
            bits,
            _marker: PhantomData,
        }
    }

    /// Recover the original pointer.
    #[inline]
    pub fn get(self) -> *mut T {
        std::ptr::with_exposed_provenance_mut(undisguise(self.bits))
    }

    /// The stored bits.
    #[inline]
    pub const fn bits(self) -> usize {
        self.bits
    }

    /// True for the disguised null pointer.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.bits == 0
    }

    /// Starting probe position before masking.
    #[inline]
    pub(crate) fn slot_hash(self) -> usize {
        FxBuildHasher.hash_one(self.bits) as usize
    }
}

impl<T> Clone for DisguisedPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DisguisedPtr<T> {}

impl<T> PartialEq for DisguisedPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl<T> Eq for DisguisedPtr<T> {}

impl<T> Hash for DisguisedPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.bits);
    }
}

impl<T> fmt::Debug for DisguisedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DisguisedPtr({:#x})", self.bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_null_is_zero() {
        let ptr = DisguisedPtr::<u64>::new(std::ptr::null_mut());
        assert!(ptr.is_null());
        assert_eq!(ptr, DisguisedPtr::NULL);
        assert!(ptr.get().is_null());
    }

    #[test]
    fn test_bits_differ_from_address() {
        let mut value = 7u64;
        let raw = &mut value as *mut u64;
        let ptr = DisguisedPtr::new(raw);

        assert_ne!(ptr.bits(), raw as usize);
        assert_eq!(ptr.bits() & 0b111, 0);
        assert_eq!(ptr.get(), raw);
    }

    proptest! {
        #[test]
        fn prop_disguise_round_trip(addr in any::<usize>()) {
            prop_assert_eq!(undisguise(disguise(addr)), addr);
        }

        #[test]
        fn prop_disguise_preserves_alignment(word in any::<usize>()) {
            let addr = word & !0b111;
            prop_assert_eq!(disguise(addr) & 0b111, 0);
            prop_assert_eq!(disguise(addr) == 0, addr == 0);
        }
    }
}
