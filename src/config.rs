//! Burst thresholds and container sizing.

use crate::error::{HatTrieError, Result};

/// Default number of entries a container may hold before it bursts.
pub const DEFAULT_MAX_COUNT: usize = 16384;

/// Default number of encoded suffix bytes a container may hold before it bursts.
pub const DEFAULT_MAX_BYTES: usize = 1 << 20;

/// Default number of hash slots in a freshly created container.
pub const DEFAULT_INITIAL_SLOTS: usize = 8;

/// Configuration for a [`HatTrie`](crate::HatTrie).
///
/// A container bursts into a trie node as soon as an insertion leaves it with
/// more than `max_count` entries or more than `max_bytes` bytes of encoded
/// suffixes (length header plus suffix bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of entries per container.
    pub max_count: usize,
    /// Maximum encoded suffix bytes per container.
    pub max_bytes: usize,
    /// Hash slots allocated for a new container. Must be a power of two.
    pub initial_slots: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_count: DEFAULT_MAX_COUNT,
            max_bytes: DEFAULT_MAX_BYTES,
            initial_slots: DEFAULT_INITIAL_SLOTS,
        }
    }
}

impl Config {
    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = max_count;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_initial_slots(mut self, initial_slots: usize) -> Self {
        self.initial_slots = initial_slots;
        self
    }

    /// Check that every field is usable.
    ///
    /// # Errors
    ///
    /// Returns [`HatTrieError::InvalidConfig`] for zero thresholds or a slot
    /// count that is not a power of two.
    pub fn validate(&self) -> Result<()> {
        if self.max_count == 0 {
            return Err(HatTrieError::InvalidConfig("max_count must be at least 1"));
        }
        if self.max_bytes == 0 {
            return Err(HatTrieError::InvalidConfig("max_bytes must be at least 1"));
        }
        if !self.initial_slots.is_power_of_two() {
            return Err(HatTrieError::InvalidConfig(
                "initial_slots must be a power of two",
            ));
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn is_overfull(&self, count: usize, bytes: usize) -> bool {
        count > self.max_count || bytes > self.max_bytes
    }
}
