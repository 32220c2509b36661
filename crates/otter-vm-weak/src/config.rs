//! Weak table configuration

use crate::error::WeakError;

/// Weak table configuration
#[derive(Debug, Clone)]
pub struct WeakConfig {
    /// Number of independently locked shards (default: 64, 8 on watch/phone/tv targets)
    pub shard_count: usize,
    /// Table capacity allocated on first insert (default: 64)
    pub initial_capacity: usize,
    /// Smallest capacity a table will compact from (default: 1024)
    pub compact_min_capacity: usize,
}

impl Default for WeakConfig {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            initial_capacity: 64,
            compact_min_capacity: 1024,
        }
    }
}

#[cfg(any(target_os = "ios", target_os = "watchos", target_os = "tvos"))]
const DEFAULT_SHARD_COUNT: usize = 8;
#[cfg(not(any(target_os = "ios", target_os = "watchos", target_os = "tvos")))]
const DEFAULT_SHARD_COUNT: usize = 64;

impl WeakConfig {
    /// Check that every size is usable as a hash mask.
    pub fn validate(&self) -> Result<(), WeakError> {
        if !self.shard_count.is_power_of_two() {
            return Err(WeakError::InvalidConfig(format!(
                "shard_count must be a power of two, got {}",
                self.shard_count
            )));
        }
        if self.initial_capacity < 4 || !self.initial_capacity.is_power_of_two() {
            return Err(WeakError::InvalidConfig(format!(
                "initial_capacity must be a power of two >= 4, got {}",
                self.initial_capacity
            )));
        }
        if self.compact_min_capacity < 16 || !self.compact_min_capacity.is_power_of_two() {
            return Err(WeakError::InvalidConfig(format!(
                "compact_min_capacity must be a power of two >= 16, got {}",
                self.compact_min_capacity
            )));
        }
        Ok(())
    }
}
