//! Weak table error types

use std::collections::TryReserveError;
use thiserror::Error;

/// Weak table errors
#[derive(Debug, Error)]
pub enum WeakError {
    /// Strict-mode registration against an object that is being finalized
    #[error(
        "Cannot form weak reference to instance ({referent:#x}). It is possible that this object was over-released, or is in the process of deallocation."
    )]
    Deallocating {
        /// Address of the object
        referent: usize,
    },

    /// Growing the table or a referrer set failed
    #[error("weak table out of memory allocating {slots} slots")]
    OutOfMemory {
        /// Requested slot count
        slots: usize,
        /// Allocator failure
        #[source]
        source: TryReserveError,
    },

    /// The open-addressing invariants no longer hold
    #[error("weak table corrupted: {what}")]
    Corrupted {
        /// What was found broken
        what: &'static str,
    },

    /// An object was passed to a guard locked for a different shard
    #[error("weak table shard mismatch: guard holds shard {locked}, object belongs to shard {expected}")]
    WrongShard {
        /// Shard the guard holds
        locked: usize,
        /// Shard the object maps to
        expected: usize,
    },

    /// Rejected configuration
    #[error("invalid weak table config: {0}")]
    InvalidConfig(String),
}

/// Report an unrecoverable weak table error.
///
/// Every caller is in a state where continuing would let a finalized
/// object's memory be reused while a weak slot still points at it.
#[cold]
#[inline(never)]
pub(crate) fn fatal(err: WeakError) -> ! {
    #[cfg(feature = "weak_logging")]
    tracing::error!(target: "otter::weak", error = %err, "fatal weak table error");

    panic!("{err}")
}

/// Allocate `len` slots, each initialized by `fill`.
///
/// Allocation failure is reported as [`WeakError::OutOfMemory`] instead of
/// aborting inside the allocator.
pub(crate) fn try_alloc_slots<T>(
    len: usize,
    fill: impl FnMut() -> T,
) -> Result<Box<[T]>, WeakError> {
    let mut slots = Vec::new();
    slots
        .try_reserve_exact(len)
        .map_err(|source| WeakError::OutOfMemory { slots: len, source })?;
    slots.resize_with(len, fill);
    Ok(slots.into_boxed_slice())
}

/// [`try_alloc_slots`], with failure routed through [`fatal`].
pub(crate) fn alloc_slots<T>(len: usize, fill: impl FnMut() -> T) -> Box<[T]> {
    try_alloc_slots(len, fill).unwrap_or_else(|err| fatal(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_slots_filled() {
        let slots = alloc_slots(8, || 3u32);
        assert_eq!(slots.len(), 8);
        assert!(slots.iter().all(|&s| s == 3));
    }

    #[test]
    fn test_alloc_slots_overflow() {
        let err = try_alloc_slots::<u64>(usize::MAX, || 0).unwrap_err();
        assert!(matches!(err, WeakError::OutOfMemory { slots: usize::MAX, .. }));
    }

    #[test]
    fn test_deallocating_message() {
        let err = WeakError::Deallocating { referent: 0x1000 };
        assert!(err.to_string().starts_with("Cannot form weak reference to instance (0x1000)"));
    }

    #[test]
    #[should_panic(expected = "weak table corrupted")]
    fn test_fatal_panics() {
        fatal(WeakError::Corrupted { what: "test" });
    }
}
