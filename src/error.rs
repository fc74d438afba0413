use std::collections::TryReserveError;

/// Errors returned by mutating [`HatTrie`](crate::HatTrie) operations.
///
/// Lookups and deletes never fail: an absent key is reported as `None`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HatTrieError {
    /// A node, container or slot buffer could not grow. Keys inserted before
    /// the failing call are still reachable.
    #[error("out of memory: {0}")]
    OutOfMemory(#[from] TryReserveError),

    /// The key is longer than a container suffix header can describe.
    #[error("key of {len} bytes exceeds the maximum of {max} bytes")]
    KeyTooLong {
        /// Length of the rejected key.
        len: usize,
        /// Longest accepted key.
        max: usize,
    },

    /// A [`Config`](crate::Config) field is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Result type for HAT-trie operations.
pub type Result<T, E = HatTrieError> = std::result::Result<T, E>;
