//! # Otter VM Weak References
//!
//! Zeroing weak reference table.
//!
//! A storage location holding a weak reference is registered against the
//! object it points at. When that object is finalized, [`WeakTable::clear`]
//! writes null through every registered location, so no weak reference is
//! ever left dangling.
//!
//! ## Design
//!
//! - **Disguised pointers**: every address in the table is stored negated, so
//!   leak checkers scanning memory don't see interior pointers into objects
//! - **Inline referrers**: up to four locations per object live inside the entry
//! - **Out-of-line referrers**: larger sets move to an open-addressed hash set
//! - **No internal locking**: operations take `&mut WeakTable`; shared use goes
//!   through [`WeakTableShards`], one lock per shard

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod disguise;
pub mod entry;
pub mod error;
pub mod referrers;
pub mod shards;
pub mod stats;
pub mod table;

pub use config::WeakConfig;
pub use disguise::DisguisedPtr;
pub use error::WeakError;
pub use shards::{LockedShard, WeakTableShards};
pub use stats::WeakTableStats;
pub use table::{DeallocatingPolicy, WeakReferent, WeakTable};
