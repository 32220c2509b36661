//! Referrer sets
//!
//! The set of weak storage locations pointing at one object. Almost every
//! object has zero or one weak referrer, so the first [`INLINE_CAPACITY`]
//! live directly inside the entry. The fifth moves the set out of line into
//! an open-addressed table that only ever grows.
//!
//! ## Probing
//!
//! Out-of-line slots use linear probing from `hash & mask`. Removal clears a
//! slot without shifting its neighbours, so an empty slot does not end a
//! lookup. Lookups stop after `max_displacement` steps instead, the longest
//! probe any insertion has needed since the last rehash.

use crate::disguise::DisguisedPtr;
use crate::error::{WeakError, alloc_slots, fatal};

/// Referrers held inside the entry before it moves out of line
pub const INLINE_CAPACITY: usize = 4;

/// Capacity of a freshly promoted out-of-line set
const OUT_OF_LINE_INITIAL_CAPACITY: usize = INLINE_CAPACITY * 2;

/// Disguised address of a weak storage location
pub type Referrer = DisguisedPtr<*mut ()>;

/// Weak storage locations registered for one object
#[derive(Debug)]
pub enum ReferrerSet {
    /// Fixed array, scanned linearly; unused slots are null
    Inline([Referrer; INLINE_CAPACITY]),
    /// Heap-allocated hash set
    OutOfLine(OutOfLineReferrers),
}

impl ReferrerSet {
    /// Inline set holding `first`.
    pub fn new(first: Referrer) -> Self {
        let mut slots = [Referrer::NULL; INLINE_CAPACITY];
        slots[0] = first;
        Self::Inline(slots)
    }

    /// Add a referrer. Returns false if it was already present.
    pub fn insert(&mut self, referrer: Referrer) -> bool {
        debug_assert!(!referrer.is_null());
        match self {
            Self::Inline(slots) => {
                if slots.contains(&referrer) {
                    return false;
                }
                if let Some(slot) = slots.iter_mut().find(|slot| slot.is_null()) {
                    *slot = referrer;
                    return true;
                }

                let mut set = OutOfLineReferrers::with_capacity(OUT_OF_LINE_INITIAL_CAPACITY);
                for &existing in slots.iter() {
                    set.insert_unique(existing);
                }
                set.insert_unique(referrer);

                #[cfg(feature = "weak_logging")]
                tracing::trace!(
                    target: "otter::weak",
                    capacity = set.capacity(),
                    "Referrer set moved out of line"
                );

                *self = Self::OutOfLine(set);
                true
            }
            Self::OutOfLine(set) => set.insert(referrer),
        }
    }

    /// Remove a referrer. Returns false if it was not present.
    pub fn remove(&mut self, referrer: Referrer) -> bool {
        if referrer.is_null() {
            return false;
        }
        match self {
            Self::Inline(slots) => match slots.iter_mut().find(|slot| **slot == referrer) {
                Some(slot) => {
                    *slot = Referrer::NULL;
                    true
                }
                None => false,
            },
            Self::OutOfLine(set) => set.remove(referrer),
        }
    }

    /// Whether `referrer` is in the set
    pub fn contains(&self, referrer: Referrer) -> bool {
        if referrer.is_null() {
            return false;
        }
        match self {
            Self::Inline(slots) => slots.contains(&referrer),
            Self::OutOfLine(set) => set.find(referrer).is_some(),
        }
    }

    /// Number of referrers
    pub fn len(&self) -> usize {
        match self {
            Self::Inline(slots) => slots.iter().filter(|slot| !slot.is_null()).count(),
            Self::OutOfLine(set) => set.count,
        }
    }

    /// True when no referrers remain
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Inline(slots) => slots.iter().all(|slot| slot.is_null()),
            Self::OutOfLine(set) => set.count == 0,
        }
    }

    /// Whether the set has moved out of line
    pub fn is_out_of_line(&self) -> bool {
        matches!(self, Self::OutOfLine(_))
    }

    /// Iterate over the referrers in slot order
    pub fn iter(&self) -> impl Iterator<Item = Referrer> + '_ {
        let slots: &[Referrer] = match self {
            Self::Inline(slots) => slots,
            Self::OutOfLine(set) => &set.slots,
        };
        slots.iter().copied().filter(|slot| !slot.is_null())
    }
}

/// Open-addressed referrer storage
#[derive(Debug)]
pub struct OutOfLineReferrers {
    /// Power-of-two sized slot array; null marks a free slot
    slots: Box<[Referrer]>,
    /// Occupied slots
    count: usize,
    /// Longest probe needed by any insertion since the last rehash
    max_displacement: usize,
}

impl OutOfLineReferrers {
    fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Self {
            slots: alloc_slots(capacity, || Referrer::NULL),
            count: 0,
            max_displacement: 0,
        }
    }

    /// Slot array size
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Longest probe distance currently in effect
    pub fn max_displacement(&self) -> usize {
        self.max_displacement
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    fn find(&self, referrer: Referrer) -> Option<usize> {
        let mask = self.mask();
        let begin = referrer.slot_hash() & mask;
        let mut index = begin;
        let mut displacement = 0;
        while self.slots[index] != referrer {
            displacement += 1;
            if displacement > self.max_displacement {
                return None;
            }
            index = (index + 1) & mask;
            if index == begin {
                fatal(WeakError::Corrupted {
                    what: "referrer probe wrapped around",
                });
            }
        }
        Some(index)
    }

    fn insert(&mut self, referrer: Referrer) -> bool {
        if self.find(referrer).is_some() {
            return false;
        }
        if self.count >= self.capacity() * 3 / 4 {
            self.grow();
        }
        self.insert_unique(referrer);
        true
    }

    /// Place a referrer known to be absent. Capacity must already allow it.
    fn insert_unique(&mut self, referrer: Referrer) {
        let mask = self.mask();
        let begin = referrer.slot_hash() & mask;
        let mut index = begin;
        let mut displacement = 0;
        while !self.slots[index].is_null() {
            index = (index + 1) & mask;
            displacement += 1;
            if index == begin {
                fatal(WeakError::Corrupted {
                    what: "referrer set has no free slot",
                });
            }
        }
        self.slots[index] = referrer;
        self.count += 1;
        self.max_displacement = self.max_displacement.max(displacement);
    }

    fn grow(&mut self) {
        let mut grown = Self::with_capacity(self.capacity() * 2);
        for &referrer in self.slots.iter().filter(|slot| !slot.is_null()) {
            grown.insert_unique(referrer);
        }

        #[cfg(feature = "weak_logging")]
        tracing::debug!(
            target: "otter::weak",
            old_capacity = self.capacity(),
            new_capacity = grown.capacity(),
            referrers = grown.count,
            "Referrer set grown"
        );

        *self = grown;
    }

    fn remove(&mut self, referrer: Referrer) -> bool {
        if referrer.is_null() {
            return false;
        }
        match self.find(referrer) {
            Some(index) => {
                self.slots[index] = Referrer::NULL;
                self.count -= 1;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn referrer(i: usize) -> Referrer {
        DisguisedPtr::new(std::ptr::without_provenance_mut(0x1000 + i * 8))
    }

    fn filled(n: usize) -> ReferrerSet {
        let mut set = ReferrerSet::new(referrer(0));
        for i in 1..n {
            assert!(set.insert(referrer(i)));
        }
        set
    }

    #[test]
    fn test_new_is_inline() {
        let set = ReferrerSet::new(referrer(0));
        assert!(!set.is_out_of_line());
        assert_eq!(set.len(), 1);
        assert!(set.contains(referrer(0)));
        assert!(!set.contains(referrer(1)));
    }

    #[test]
    fn test_fifth_referrer_promotes() {
        let mut set = filled(INLINE_CAPACITY);
        assert!(!set.is_out_of_line());

        assert!(set.insert(referrer(INLINE_CAPACITY)));
        assert!(set.is_out_of_line());
        assert_eq!(set.len(), INLINE_CAPACITY + 1);
        for i in 0..=INLINE_CAPACITY {
            assert!(set.contains(referrer(i)));
        }

        match &set {
            ReferrerSet::OutOfLine(out) => assert_eq!(out.capacity(), OUT_OF_LINE_INITIAL_CAPACITY),
            ReferrerSet::Inline(_) => unreachable!(),
        }
    }

    #[test]
    fn test_duplicate_insert_ignored() {
        let mut set = filled(3);
        assert!(!set.insert(referrer(1)));
        assert_eq!(set.len(), 3);

        let mut set = filled(10);
        assert!(!set.insert(referrer(7)));
        assert_eq!(set.len(), 10);
    }

    #[test]
    fn test_inline_slot_reused() {
        let mut set = filled(INLINE_CAPACITY);
        assert!(set.remove(referrer(2)));
        assert!(set.insert(referrer(99)));
        assert!(!set.is_out_of_line());
        assert_eq!(set.len(), INLINE_CAPACITY);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut set = filled(2);
        assert!(!set.remove(referrer(5)));
        assert!(!set.remove(Referrer::NULL));
        assert_eq!(set.len(), 2);

        let mut set = filled(20);
        assert!(!set.remove(referrer(500)));
        assert!(!set.remove(Referrer::NULL));
        assert_eq!(set.len(), 20);
    }

    #[test]
    fn test_remove_null_keeps_free_slots() {
        let mut set = ReferrerSet::new(referrer(0));
        assert!(!set.remove(Referrer::NULL));
        assert_eq!(set.len(), 1);
        assert!(set.contains(referrer(0)));

        // Free inline slots are still usable afterwards
        for i in 1..INLINE_CAPACITY {
            assert!(set.insert(referrer(i)));
        }
        assert!(!set.is_out_of_line());
        assert_eq!(set.len(), INLINE_CAPACITY);
    }

    #[test]
    fn test_out_of_line_never_demotes() {
        let mut set = filled(6);
        for i in 0..6 {
            assert!(set.remove(referrer(i)));
        }
        assert!(set.is_empty());
        assert!(set.is_out_of_line());
        assert_eq!(set.iter().count(), 0);
    }

    #[test]
    fn test_growth_keeps_members() {
        let set = filled(100);
        assert_eq!(set.len(), 100);
        for i in 0..100 {
            assert!(set.contains(referrer(i)), "lost referrer {i}");
        }
        match &set {
            ReferrerSet::OutOfLine(out) => {
                assert!(out.capacity().is_power_of_two());
                assert!(out.count * 4 <= out.capacity() * 3);
                assert!(out.max_displacement() < out.capacity());
            }
            ReferrerSet::Inline(_) => unreachable!(),
        }
    }

    #[test]
    fn test_removal_keeps_probe_chains_reachable() {
        let mut set = filled(200);
        for i in (0..200).step_by(2) {
            assert!(set.remove(referrer(i)));
        }
        assert_eq!(set.len(), 100);
        for i in 0..200 {
            assert_eq!(set.contains(referrer(i)), i % 2 == 1, "referrer {i}");
        }

        // Refill holes and make sure nothing collides with survivors
        for i in (0..200).step_by(2) {
            assert!(set.insert(referrer(i)));
        }
        assert_eq!(set.len(), 200);
        for i in 0..200 {
            assert!(set.contains(referrer(i)));
        }
    }

    #[test]
    fn test_iter_visits_each_once() {
        let set = filled(37);
        let mut seen: Vec<usize> = set.iter().map(|r| r.bits()).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 37);
    }
}
