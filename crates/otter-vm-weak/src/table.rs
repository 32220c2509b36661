//! Weak reference table
//!
//! Open-addressed hash table from a weakly referenced object to the storage
//! locations holding weak references to it.
//!
//! The table does no locking of its own. Every operation takes
//! `&mut WeakTable`, so holding the reference is the proof of exclusive
//! access. Shared tables never hand one out; they are driven through a
//! [`crate::shards::LockedShard`] guard bound to one shard.
//!
//! ## Lifecycle
//!
//! 1. [`WeakTable::register`] when a weak storage location starts pointing at an object
//! 2. [`WeakTable::unregister`] when it stops
//! 3. [`WeakTable::clear`] exactly once while the object is finalized, before
//!    its memory is reused; every registered location is set to null
//!
//! ## Growth
//!
//! The table doubles before an insert would take it past 3/4 full, and
//! shrinks to 1/8 of its capacity once a large table drops to 1/16 full.
//! Removal leaves holes, so lookups run to `max_displacement` rather than
//! stopping at the first empty slot; a rehash recomputes it from scratch.

use std::fmt;
use std::ptr;

use crate::config::WeakConfig;
use crate::disguise::DisguisedPtr;
use crate::entry::WeakEntry;
use crate::error::{WeakError, alloc_slots, fatal};
use crate::referrers::Referrer;
use crate::stats::WeakTableStats;

/// Finalization state of an object that can be weakly referenced.
///
/// Implemented by the runtime's object type.
pub trait WeakReferent {
    /// Whether finalization of this object has begun
    fn is_deallocating(&self) -> bool;
}

/// What [`WeakTable::register`] does when the referent is being finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeallocatingPolicy {
    /// Report a fatal error
    Crash,
    /// Register nothing and return null
    ReturnNull,
}

/// Weak reference table
pub struct WeakTable {
    /// Power-of-two sized slot array, empty until the first insert
    entries: Box<[Option<WeakEntry>]>,
    /// Occupied slots
    num_entries: usize,
    /// Longest probe needed by any insertion since the last rehash
    max_displacement: usize,
    /// Capacity allocated on first insert
    initial_capacity: usize,
    /// Tables smaller than this never compact
    compact_min_capacity: usize,
}

impl WeakTable {
    /// Create an empty table with default config
    pub fn new() -> Self {
        Self::from_validated(&WeakConfig::default())
    }

    /// Create an empty table with custom config
    pub fn with_config(config: &WeakConfig) -> Result<Self, WeakError> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    pub(crate) fn from_validated(config: &WeakConfig) -> Self {
        Self {
            entries: Box::default(),
            num_entries: 0,
            max_displacement: 0,
            initial_capacity: config.initial_capacity,
            compact_min_capacity: config.compact_min_capacity,
        }
    }

    /// Register `referrer` as a weak reference to `referent`.
    ///
    /// Returns the value the caller should store in `*referrer`: `referent`
    /// itself, or null if `referent` is being finalized under
    /// [`DeallocatingPolicy::ReturnNull`]. A null `referent` or a null
    /// `referrer` registers nothing.
    ///
    /// # Panics
    /// If `referent` is being finalized under [`DeallocatingPolicy::Crash`],
    /// or if the table cannot grow.
    ///
    /// # Safety
    /// - `referent` must be null or point to a live object
    /// - `referrer` must be null or stay valid for writes until it is
    ///   unregistered or `referent` is cleared
    pub unsafe fn register<T: WeakReferent>(
        &mut self,
        referent: *mut T,
        referrer: *mut *mut T,
        policy: DeallocatingPolicy,
    ) -> *mut T {
        if referent.is_null() || referrer.is_null() {
            return referent;
        }

        // SAFETY: caller guarantees referent points to a live object
        if unsafe { (*referent).is_deallocating() } {
            return match policy {
                DeallocatingPolicy::Crash => fatal(WeakError::Deallocating {
                    referent: referent.addr(),
                }),
                DeallocatingPolicy::ReturnNull => ptr::null_mut(),
            };
        }

        let key = DisguisedPtr::new(referent.cast::<()>());
        let referrer = Referrer::new(referrer.cast::<*mut ()>());
        match self.find(key) {
            Some(index) => self.occupied_mut(index).add_referrer(referrer),
            None => self.insert_entry(WeakEntry::new(key, referrer)),
        }
        referent
    }

    /// Remove `referrer` from `referent`'s weak references.
    ///
    /// Unknown objects and locations are ignored. The entry is dropped once
    /// its last referrer goes.
    pub fn unregister<T>(&mut self, referent: *mut T, referrer: *mut *mut T) {
        if referent.is_null() {
            return;
        }

        let Some(index) = self.find(DisguisedPtr::new(referent.cast::<()>())) else {
            return;
        };
        let entry = self.occupied_mut(index);
        entry.remove_referrer(Referrer::new(referrer.cast::<*mut ()>()));
        if entry.is_empty() {
            self.remove_at(index);
        }
    }

    /// Null out every weak reference to `referent` and forget it.
    ///
    /// Called once by finalization, before `referent`'s memory is reclaimed.
    /// A registered location that no longer holds `referent` is left alone.
    /// Returns the number of locations set to null.
    ///
    /// # Safety
    /// Every location registered for `referent` must still be valid for
    /// reads and writes.
    pub unsafe fn clear<T>(&mut self, referent: *mut T) -> usize {
        if referent.is_null() {
            return 0;
        }

        let Some(index) = self.find(DisguisedPtr::new(referent.cast::<()>())) else {
            return 0;
        };
        let entry = self.remove_at(index);
        if entry.is_empty() {
            fatal(WeakError::Corrupted {
                what: "entry without referrers left in table",
            });
        }

        let mut cleared = 0;
        for referrer in entry.referrers().iter() {
            let slot = referrer.get().cast::<*mut T>();
            // SAFETY: caller guarantees registered locations are still valid
            let current = unsafe { slot.read() };
            if current == referent {
                // SAFETY: as above
                unsafe { slot.write(ptr::null_mut()) };
                cleared += 1;
            } else if !current.is_null() {
                #[cfg(feature = "weak_logging")]
                tracing::warn!(
                    target: "otter::weak",
                    referrer = referrer.bits(),
                    referent = entry.referent().bits(),
                    "Weak location no longer holds its registered referent; \
                     it was overwritten without unregistering"
                );
            }
        }

        #[cfg(feature = "weak_logging")]
        tracing::trace!(
            target: "otter::weak",
            referent = entry.referent().bits(),
            cleared,
            "Weak references cleared"
        );

        cleared
    }

    /// Whether `referent` has any weak references
    #[cfg(debug_assertions)]
    pub fn is_registered<T>(&self, referent: *mut T) -> bool {
        !referent.is_null() && self.find(DisguisedPtr::new(referent.cast::<()>())).is_some()
    }

    /// Number of weak references to `referent`
    pub fn referrer_count<T>(&self, referent: *mut T) -> usize {
        if referent.is_null() {
            return 0;
        }
        self.find(DisguisedPtr::new(referent.cast::<()>()))
            .and_then(|index| self.entries[index].as_ref())
            .map_or(0, |entry| entry.referrers().len())
    }

    /// Number of weakly referenced objects
    pub fn len(&self) -> usize {
        self.num_entries
    }

    /// True when nothing is weakly referenced
    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    /// Allocated entry slots
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Snapshot of table statistics
    pub fn stats(&self) -> WeakTableStats {
        let mut stats = WeakTableStats {
            entries: self.num_entries,
            capacity: self.capacity(),
            max_displacement: self.max_displacement,
            ..Default::default()
        };
        for entry in self.entries.iter().flatten() {
            stats.referrers += entry.referrers().len();
            if entry.referrers().is_out_of_line() {
                stats.out_of_line_entries += 1;
            }
        }
        stats
    }

    fn find(&self, key: DisguisedPtr<()>) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }

        let mask = self.entries.len() - 1;
        let begin = key.slot_hash() & mask;
        let mut index = begin;
        let mut displacement = 0;
        while !matches!(&self.entries[index], Some(entry) if entry.referent() == key) {
            displacement += 1;
            if displacement > self.max_displacement {
                return None;
            }
            index = (index + 1) & mask;
            if index == begin {
                fatal(WeakError::Corrupted {
                    what: "entry probe wrapped around",
                });
            }
        }
        Some(index)
    }

    fn occupied_mut(&mut self, index: usize) -> &mut WeakEntry {
        match &mut self.entries[index] {
            Some(entry) => entry,
            None => fatal(WeakError::Corrupted {
                what: "lookup returned an empty slot",
            }),
        }
    }

    fn insert_entry(&mut self, entry: WeakEntry) {
        self.grow_maybe();
        self.insert_unique(entry);
    }

    /// Place an entry whose referent is absent. Capacity must already allow it.
    fn insert_unique(&mut self, entry: WeakEntry) {
        let mask = self.entries.len() - 1;
        let begin = entry.referent().slot_hash() & mask;
        let mut index = begin;
        let mut displacement = 0;
        while self.entries[index].is_some() {
            index = (index + 1) & mask;
            displacement += 1;
            if index == begin {
                fatal(WeakError::Corrupted {
                    what: "weak table has no free slot",
                });
            }
        }
        self.entries[index] = Some(entry);
        self.num_entries += 1;
        self.max_displacement = self.max_displacement.max(displacement);
    }

    fn remove_at(&mut self, index: usize) -> WeakEntry {
        let Some(entry) = self.entries[index].take() else {
            fatal(WeakError::Corrupted {
                what: "removing an empty slot",
            });
        };
        self.num_entries -= 1;
        self.compact_maybe();
        entry
    }

    fn grow_maybe(&mut self) {
        let old_capacity = self.capacity();
        if self.num_entries >= old_capacity * 3 / 4 {
            let new_capacity = if old_capacity == 0 {
                self.initial_capacity
            } else {
                old_capacity * 2
            };
            self.resize(new_capacity);
        }
    }

    fn compact_maybe(&mut self) {
        let old_capacity = self.capacity();
        if old_capacity >= self.compact_min_capacity && self.num_entries <= old_capacity / 16 {
            self.resize(old_capacity / 8);
        }
    }

    fn resize(&mut self, new_capacity: usize) {
        debug_assert!(new_capacity.is_power_of_two());
        let old_entries = std::mem::replace(&mut self.entries, alloc_slots(new_capacity, || None));

        #[cfg(feature = "weak_logging")]
        tracing::debug!(
            target: "otter::weak",
            old_capacity = old_entries.len(),
            new_capacity,
            entries = self.num_entries,
            "Weak table resized"
        );

        self.num_entries = 0;
        self.max_displacement = 0;
        for entry in old_entries.into_vec().into_iter().flatten() {
            self.insert_unique(entry);
        }
    }
}

impl Default for WeakTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WeakTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakTable")
            .field("entries", &self.num_entries)
            .field("capacity", &self.capacity())
            .field("max_displacement", &self.max_displacement)
            .finish()
    }
}
