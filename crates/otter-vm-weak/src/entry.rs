//! Weak table entries

use crate::disguise::DisguisedPtr;
use crate::referrers::{Referrer, ReferrerSet};

/// Every weak storage location currently pointing at one object.
///
/// An entry lives in the table only while it has at least one referrer.
#[derive(Debug)]
pub struct WeakEntry {
    referent: DisguisedPtr<()>,
    referrers: ReferrerSet,
}

impl WeakEntry {
    /// Entry for `referent` with a single referrer.
    pub fn new(referent: DisguisedPtr<()>, referrer: Referrer) -> Self {
        Self {
            referent,
            referrers: ReferrerSet::new(referrer),
        }
    }

    /// The weakly referenced object
    pub fn referent(&self) -> DisguisedPtr<()> {
        self.referent
    }

    /// The registered storage locations
    pub fn referrers(&self) -> &ReferrerSet {
        &self.referrers
    }

    /// Add a storage location. Duplicates are ignored.
    pub fn add_referrer(&mut self, referrer: Referrer) {
        self.referrers.insert(referrer);
    }

    /// Remove a storage location. Unknown locations are ignored.
    pub fn remove_referrer(&mut self, referrer: Referrer) {
        let _removed = self.referrers.remove(referrer);

        #[cfg(feature = "weak_logging")]
        if !_removed {
            tracing::debug!(
                target: "otter::weak",
                referrer = referrer.bits(),
                "Unregister of unknown weak referrer ignored"
            );
        }
    }

    /// True when no referrers remain
    pub fn is_empty(&self) -> bool {
        self.referrers.is_empty()
    }
}
