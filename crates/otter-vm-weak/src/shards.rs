//! Sharded weak tables
//!
//! One [`WeakTable`] per shard, each behind its own lock and padded to a
//! cache line. An object always maps to the same shard, so operations on
//! unrelated objects rarely contend.
//!
//! A shard's table is only reachable through a [`LockedShard`] guard, which
//! checks that every object handed to it maps to the shard it holds. An
//! object registered in the wrong shard would be missed by `clear`.

use crossbeam_utils::CachePadded;
use parking_lot::{Mutex, MutexGuard};

use crate::config::WeakConfig;
use crate::error::{WeakError, fatal};
use crate::stats::WeakTableStats;
use crate::table::{DeallocatingPolicy, WeakReferent, WeakTable};

/// Weak tables partitioned by object address
pub struct WeakTableShards {
    shards: Box<[CachePadded<Mutex<WeakTable>>]>,
}

impl WeakTableShards {
    /// Create shards with default config
    pub fn new() -> Self {
        Self::from_validated(&WeakConfig::default())
    }

    /// Create shards with custom config
    pub fn with_config(config: &WeakConfig) -> Result<Self, WeakError> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    fn from_validated(config: &WeakConfig) -> Self {
        let shards = (0..config.shard_count)
            .map(|_| CachePadded::new(Mutex::new(WeakTable::from_validated(config))))
            .collect();
        Self { shards }
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard responsible for `referent`
    pub fn shard_index<T>(&self, referent: *const T) -> usize {
        let addr = referent.addr();
        ((addr >> 4) ^ (addr >> 9)) & (self.shards.len() - 1)
    }

    /// Lock the shard responsible for `referent`.
    ///
    /// The guard accepts `referent` and any other object mapping to the same
    /// shard. The lock must not be held across anything that can re-enter
    /// the weak table.
    pub fn lock<T>(&self, referent: *const T) -> LockedShard<'_> {
        let index = self.shard_index(referent);
        LockedShard {
            table: self.shards[index].lock(),
            shards: self,
            index,
        }
    }

    /// [`WeakTable::register`] under the shard lock.
    ///
    /// # Safety
    /// Same contract as [`WeakTable::register`].
    pub unsafe fn register<T: WeakReferent>(
        &self,
        referent: *mut T,
        referrer: *mut *mut T,
        policy: DeallocatingPolicy,
    ) -> *mut T {
        let mut table = self.lock(referent);
        // SAFETY: forwarded from caller
        unsafe { table.register(referent, referrer, policy) }
    }

    /// [`WeakTable::unregister`] under the shard lock.
    pub fn unregister<T>(&self, referent: *mut T, referrer: *mut *mut T) {
        self.lock(referent).unregister(referent, referrer);
    }

    /// [`WeakTable::clear`] under the shard lock.
    ///
    /// # Safety
    /// Same contract as [`WeakTable::clear`].
    pub unsafe fn clear<T>(&self, referent: *mut T) -> usize {
        let mut table = self.lock(referent);
        // SAFETY: forwarded from caller
        unsafe { table.clear(referent) }
    }

    /// [`WeakTable::is_registered`] under the shard lock.
    #[cfg(debug_assertions)]
    pub fn is_registered<T>(&self, referent: *mut T) -> bool {
        self.lock(referent).is_registered(referent)
    }

    /// [`WeakTable::referrer_count`] under the shard lock.
    pub fn referrer_count<T>(&self, referent: *mut T) -> usize {
        self.lock(referent).referrer_count(referent)
    }

    /// Statistics summed over all shards.
    ///
    /// Shards are locked one at a time, so the result is not an atomic
    /// snapshot while other threads are registering.
    pub fn stats(&self) -> WeakTableStats {
        let mut total = WeakTableStats::default();
        for shard in self.shards.iter() {
            total += shard.lock().stats();
        }
        total
    }
}

/// Exclusive access to one shard's [`WeakTable`].
///
/// Every operation checks that its object belongs to this shard; a mismatch
/// is fatal.
pub struct LockedShard<'a> {
    table: MutexGuard<'a, WeakTable>,
    shards: &'a WeakTableShards,
    index: usize,
}

impl LockedShard<'_> {
    /// Index of the locked shard
    pub fn shard_index(&self) -> usize {
        self.index
    }

    fn check<T>(&self, referent: *const T) {
        if referent.is_null() {
            return;
        }
        let expected = self.shards.shard_index(referent);
        if expected != self.index {
            fatal(WeakError::WrongShard {
                locked: self.index,
                expected,
            });
        }
    }

    /// [`WeakTable::register`] on the locked shard.
    ///
    /// # Panics
    /// If `referent` belongs to another shard, and as [`WeakTable::register`].
    ///
    /// # Safety
    /// Same contract as [`WeakTable::register`].
    pub unsafe fn register<T: WeakReferent>(
        &mut self,
        referent: *mut T,
        referrer: *mut *mut T,
        policy: DeallocatingPolicy,
    ) -> *mut T {
        self.check(referent);
        // SAFETY: forwarded from caller
        unsafe { self.table.register(referent, referrer, policy) }
    }

    /// [`WeakTable::unregister`] on the locked shard.
    ///
    /// # Panics
    /// If `referent` belongs to another shard.
    pub fn unregister<T>(&mut self, referent: *mut T, referrer: *mut *mut T) {
        self.check(referent);
        self.table.unregister(referent, referrer);
    }

    /// [`WeakTable::clear`] on the locked shard.
    ///
    /// # Panics
    /// If `referent` belongs to another shard.
    ///
    /// # Safety
    /// Same contract as [`WeakTable::clear`].
    pub unsafe fn clear<T>(&mut self, referent: *mut T) -> usize {
        self.check(referent);
        // SAFETY: forwarded from caller
        unsafe { self.table.clear(referent) }
    }

    /// [`WeakTable::is_registered`] on the locked shard.
    #[cfg(debug_assertions)]
    pub fn is_registered<T>(&self, referent: *mut T) -> bool {
        self.check(referent);
        self.table.is_registered(referent)
    }

    /// [`WeakTable::referrer_count`] on the locked shard.
    pub fn referrer_count<T>(&self, referent: *mut T) -> usize {
        self.check(referent);
        self.table.referrer_count(referent)
    }

    /// Statistics for the locked shard
    pub fn stats(&self) -> WeakTableStats {
        self.table.stats()
    }
}

impl std::fmt::Debug for LockedShard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedShard")
            .field("index", &self.index)
            .field("table", &*self.table)
            .finish()
    }
}

impl Default for WeakTableShards {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WeakTableShards {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakTableShards")
            .field("shard_count", &self.shards.len())
            .finish()
    }
}
