//! Weak table statistics

use std::ops::AddAssign;

/// Weak table statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WeakTableStats {
    /// Objects with at least one weak referrer
    pub entries: usize,
    /// Allocated entry slots
    pub capacity: usize,
    /// Longest entry probe distance
    pub max_displacement: usize,
    /// Entries whose referrers moved out of line
    pub out_of_line_entries: usize,
    /// Registered weak storage locations
    pub referrers: usize,
}

impl AddAssign for WeakTableStats {
    fn add_assign(&mut self, other: Self) {
        self.entries += other.entries;
        self.capacity += other.capacity;
        self.max_displacement = self.max_displacement.max(other.max_displacement);
        self.out_of_line_entries += other.out_of_line_entries;
        self.referrers += other.referrers;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_shard_stats() {
        let mut total = WeakTableStats::default();
        total += WeakTableStats {
            entries: 3,
            capacity: 64,
            max_displacement: 2,
            out_of_line_entries: 1,
            referrers: 9,
        };
        total += WeakTableStats {
            entries: 1,
            capacity: 64,
            max_displacement: 5,
            out_of_line_entries: 0,
            referrers: 1,
        };
        total += WeakTableStats::default();

        assert_eq!(
            total,
            WeakTableStats {
                entries: 4,
                capacity: 128,
                max_displacement: 5,
                out_of_line_entries: 1,
                referrers: 10,
            }
        );
    }
}
