//! # hat-trie
//!
//! An ordered map from byte-string keys to values, built as a HAT-trie: a
//! byte-indexed trie whose leaves are array-hash containers.
//!
//! Keys sharing a prefix live together in a container that stores only their
//! remaining suffixes, packed into a handful of byte buffers. When a container
//! grows past the configured thresholds it *bursts* into a trie node whose
//! edges lead to smaller containers, one per leading byte.
//!
//! Based on "HAT-trie: A Cache-conscious Trie-based Data Structure for
//! Strings" (ACSC 2007, Askitis and Sinha).
//!
//! ## Example
//!
//! ```rust
//! use std::ops::ControlFlow;
//! use hat_trie::HatTrie;
//!
//! let mut trie: HatTrie = HatTrie::new();
//! *trie.get_or_insert(b"hello")? += 3;
//! *trie.get_or_insert(b"hello world2")? += 2;
//!
//! assert_eq!(trie.get(b"hello"), Some(&3));
//! assert_eq!(trie.get(b"hell"), None);
//!
//! let mut found = Vec::new();
//! trie.walk(b"hello world20", |key, value| {
//!     found.push((key.to_vec(), *value));
//!     ControlFlow::Continue(())
//! });
//! assert_eq!(found, vec![(b"hello".to_vec(), 3), (b"hello world2".to_vec(), 2)]);
//! # Ok::<(), hat_trie::HatTrieError>(())
//! ```
//!
//! ## Reference validity
//!
//! A value reference handed out by [`HatTrie::get_or_insert`] or
//! [`HatTrie::get_mut`] is tied to a mutable borrow of the trie, so it cannot
//! outlive the next mutating call. Insertions may regrow a container or burst
//! it into new storage, which moves values.

#![deny(unsafe_op_in_unsafe_fn)]

mod arena;
mod config;
mod container;
mod error;
mod iter;
mod node;
mod walk;

pub use config::{Config, DEFAULT_INITIAL_SLOTS, DEFAULT_MAX_BYTES, DEFAULT_MAX_COUNT};
pub use error::{HatTrieError, Result};
pub use iter::{Cursor, Iter, Keys, Order};

use smallvec::SmallVec;
use tracing::{debug, trace};

use arena::Arena;
use container::Container;
use node::{Child, ContainerId, NodeId, TrieNode};

/// Longest key that can be stored.
pub const MAX_KEY_LEN: usize = container::MAX_SUFFIX_LEN;

/// Structural statistics, see [`HatTrie::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HatTrieStats {
    /// Trie nodes, including the root.
    pub nodes: usize,
    /// Live containers.
    pub containers: usize,
    /// Stored keys.
    pub len: usize,
    /// Entries in the fullest container.
    pub max_container_len: usize,
    /// Encoded suffix bytes in the largest container.
    pub max_container_bytes: usize,
}

/// Where the descent for a key ended.
enum Descent<'k> {
    /// Every key byte was consumed by node edges.
    Node(NodeId),
    /// Edge `byte` of `parent` leads to container `id`, which would hold `suffix`.
    Container {
        parent: NodeId,
        byte: u8,
        id: ContainerId,
        suffix: &'k [u8],
    },
    /// Edge `byte` of `parent` is absent.
    Vacant {
        parent: NodeId,
        byte: u8,
        suffix: &'k [u8],
    },
}

// =============================================================================
// HatTrie
// =============================================================================

/// An ordered map from byte strings to `V`, stored as a HAT-trie.
///
/// Keys are opaque byte sequences: every byte value including `0x00` is
/// allowed, and keys up to [`MAX_KEY_LEN`] bytes can be stored.
///
/// Features:
/// - Arena-owned nodes and containers addressed by index
/// - Containers burst recursively as soon as they exceed [`Config`] thresholds
/// - Sorted or storage-order iteration, and prefix walks
/// - Containers emptied by removals are detached and freed
#[derive(Clone)]
pub struct HatTrie<V = u64> {
    nodes: Arena<TrieNode<V>>,
    containers: Arena<Container<V>>,
    root: NodeId,
    len: usize,
    config: Config,
}

impl<V> HatTrie<V> {
    /// Creates an empty trie with the default [`Config`].
    pub fn new() -> Self {
        Self::with_config(Config::default()).expect("default configuration is valid")
    }

    /// Creates an empty trie with the given burst thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`HatTrieError::InvalidConfig`] if `config` fails
    /// [`Config::validate`], or [`HatTrieError::OutOfMemory`] if the root node
    /// cannot be allocated.
    pub fn with_config(config: Config) -> Result<Self> {
        config.validate()?;
        let mut nodes = Arena::new();
        let root = NodeId(nodes.alloc(TrieNode::new()?)?);
        if config != Config::default() {
            debug!(
                max_count = config.max_count,
                max_bytes = config.max_bytes,
                initial_slots = config.initial_slots,
                "created HAT-trie"
            );
        }
        Ok(Self {
            nodes,
            containers: Arena::new(),
            root,
            len: 0,
            config,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Heap bytes owned by the trie, including spare capacity.
    pub fn memory_usage(&self) -> usize {
        self.nodes.capacity_bytes()
            + self.nodes.iter().map(|(_, n)| n.memory_usage()).sum::<usize>()
            + self.containers.capacity_bytes()
            + self
                .containers
                .iter()
                .map(|(_, c)| c.memory_usage())
                .sum::<usize>()
    }

    pub fn shrink_to_fit(&mut self) {
        self.nodes.shrink_to_fit();
        self.containers.shrink_to_fit();
    }

    pub fn stats(&self) -> HatTrieStats {
        let mut stats = HatTrieStats {
            nodes: self.nodes.len(),
            containers: self.containers.len(),
            len: self.len,
            ..HatTrieStats::default()
        };
        for (_, c) in self.containers.iter() {
            stats.max_container_len = stats.max_container_len.max(c.len());
            stats.max_container_bytes = stats.max_container_bytes.max(c.total_bytes());
        }
        stats
    }

    /// Removes every key. The configuration and the root node's storage are
    /// kept, so clearing never allocates.
    pub fn clear(&mut self) {
        debug!(len = self.len, "clearing HAT-trie");
        self.containers.clear();
        // The root is the first node allocated and nodes are never freed.
        debug_assert_eq!(self.root, NodeId(0));
        self.nodes.truncate(1);
        self.nodes.get_mut(self.root.0).reset();
        self.len = 0;
    }

    fn descend<'k>(&self, key: &'k [u8]) -> Descent<'k> {
        let mut node = self.root;
        let mut depth = 0;
        loop {
            let Some(&byte) = key.get(depth) else {
                return Descent::Node(node);
            };
            let suffix = &key[depth + 1..];
            match self.nodes.get(node.0).child(byte) {
                None => {
                    return Descent::Vacant {
                        parent: node,
                        byte,
                        suffix,
                    }
                }
                Some(Child::Node(next)) => {
                    node = next;
                    depth += 1;
                }
                Some(Child::Container(id)) => {
                    return Descent::Container {
                        parent: node,
                        byte,
                        id,
                        suffix,
                    }
                }
            }
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&V> {
        match self.descend(key) {
            Descent::Node(id) => self.nodes.get(id.0).value.as_ref(),
            Descent::Container { id, suffix, .. } => self.containers.get(id.0).get(suffix),
            Descent::Vacant { .. } => None,
        }
    }

    /// Looks up `key` without allocating or changing the structure.
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        match self.descend(key) {
            Descent::Node(id) => self.nodes.get_mut(id.0).value.as_mut(),
            Descent::Container { id, suffix, .. } => {
                self.containers.get_mut(id.0).get_mut(suffix)
            }
            Descent::Vacant { .. } => None,
        }
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Returns the value for `key`, inserting `V::default()` first if absent.
    ///
    /// # Errors
    ///
    /// [`HatTrieError::KeyTooLong`] if `key` exceeds [`MAX_KEY_LEN`].
    /// [`HatTrieError::OutOfMemory`] if storage could not grow; every key
    /// stored before the call stays reachable. If the failure happens while
    /// bursting, the new key itself has already been stored.
    pub fn get_or_insert(&mut self, key: &[u8]) -> Result<&mut V>
    where
        V: Default,
    {
        self.get_or_insert_with(key, V::default)
    }

    /// Like [`Self::get_or_insert`], with the initial value produced by `f`.
    pub fn get_or_insert_with<F>(&mut self, key: &[u8], f: F) -> Result<&mut V>
    where
        F: FnOnce() -> V,
    {
        if key.len() > MAX_KEY_LEN {
            return Err(HatTrieError::KeyTooLong {
                len: key.len(),
                max: MAX_KEY_LEN,
            });
        }

        let (parent, byte, id, pos) = match self.descend(key) {
            Descent::Node(id) => {
                let node = self.nodes.get_mut(id.0);
                if node.value.is_none() {
                    self.len += 1;
                }
                return Ok(node.value.get_or_insert_with(f));
            }
            Descent::Container {
                parent,
                byte,
                id,
                suffix,
            } => {
                if let Some(pos) = self.containers.get(id.0).find(suffix) {
                    return Ok(self.containers.get_mut(id.0).value_mut(pos));
                }
                let pos = self.containers.get_mut(id.0).insert(suffix, f())?;
                (parent, byte, id, pos)
            }
            Descent::Vacant {
                parent,
                byte,
                suffix,
            } => {
                let mut container = Container::with_slots(self.config.initial_slots)?;
                let pos = container.insert(suffix, f())?;
                let id = ContainerId(self.containers.alloc(container)?);
                self.nodes
                    .get_mut(parent.0)
                    .set_child(byte, Some(Child::Container(id)));
                (parent, byte, id, pos)
            }
        };
        self.len += 1;

        if self.containers.get(id.0).is_overfull(&self.config) {
            self.burst(parent, byte)?;
            return Ok(self
                .get_mut(key)
                .expect("key stored before burst must stay reachable"));
        }
        Ok(self.containers.get_mut(id.0).value_mut(pos))
    }

    /// Stores `value` under `key`, returning the previous value.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_or_insert`].
    pub fn insert(&mut self, key: &[u8], value: V) -> Result<Option<V>> {
        if let Some(slot) = self.get_mut(key) {
            return Ok(Some(std::mem::replace(slot, value)));
        }
        self.get_or_insert_with(key, || value)?;
        Ok(None)
    }

    /// Removes `key`, returning its value. Absent keys are a no-op.
    ///
    /// A container left empty is detached from its parent and freed. Trie
    /// nodes are never removed, so heavy churn over many distinct prefixes
    /// keeps the node count at its high-water mark until [`Self::clear`].
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        let old = match self.descend(key) {
            Descent::Node(id) => self.nodes.get_mut(id.0).value.take(),
            Descent::Container {
                parent,
                byte,
                id,
                suffix,
            } => {
                let container = self.containers.get_mut(id.0);
                let old = container.remove(suffix);
                if old.is_some() && container.is_empty() {
                    self.nodes.get_mut(parent.0).set_child(byte, None);
                    self.containers.free(id.0);
                    trace!(byte, "pruned empty container");
                }
                old
            }
            Descent::Vacant { .. } => None,
        }?;
        self.len -= 1;
        Some(old)
    }

    // =========================================================================
    // Burst
    // =========================================================================

    /// Bursts the container behind edge `byte` of `parent`, then every child
    /// container that is still over the thresholds.
    ///
    /// Each burst reduces the longest suffix below it by one byte, so the
    /// cascade ends once suffixes run out.
    fn burst(&mut self, parent: NodeId, byte: u8) -> Result<()> {
        let mut pending: SmallVec<[(NodeId, u8); 8]> = SmallVec::new();
        pending.push((parent, byte));

        while let Some((parent, byte)) = pending.pop() {
            let Some(Child::Container(id)) = self.nodes.get(parent.0).child(byte) else {
                continue;
            };
            let node = self.burst_container(parent, byte, id)?;
            for (b, child) in self.nodes.get(node.0).children() {
                if let Child::Container(cid) = child {
                    if self.containers.get(cid.0).is_overfull(&self.config) {
                        pending.push((node, b));
                    }
                }
            }
        }
        Ok(())
    }

    /// Replaces one container with a node over freshly split children.
    ///
    /// The replacement is fully allocated before any entry moves, and is
    /// linked into `parent` in a single edge write.
    fn burst_container(&mut self, parent: NodeId, byte: u8, id: ContainerId) -> Result<NodeId> {
        let old = self.containers.get(id.0);
        let split = old.prepare_split(&self.config)?;
        trace!(
            byte,
            entries = old.len(),
            bytes = old.total_bytes(),
            children = split.children.len(),
            "bursting container"
        );
        let mut node = TrieNode::new()?;
        self.nodes.reserve(1)?;
        self.containers.reserve(split.children.len())?;

        // Nothing below allocates: arena capacity is reserved above.
        let old = self
            .containers
            .free(id.0)
            .expect("bursting container is live");
        let split = old.split_into(split);
        node.value = split.residual;
        for (b, child) in split.children {
            let cid = ContainerId(self.containers.alloc(child)?);
            node.set_child(b, Some(Child::Container(cid)));
        }
        let nid = NodeId(self.nodes.alloc(node)?);
        self.nodes
            .get_mut(parent.0)
            .set_child(byte, Some(Child::Node(nid)));
        Ok(nid)
    }
}

impl<V> Default for HatTrie<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: std::fmt::Debug> std::fmt::Debug for HatTrie<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: AsRef<[u8]>, V> Extend<(K, V)> for HatTrie<V> {
    /// # Panics
    ///
    /// Panics if a key is longer than [`MAX_KEY_LEN`] or storage cannot grow.
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (k, v) in iter {
            if let Err(e) = self.insert(k.as_ref(), v) {
                panic!("failed to extend HatTrie: {e}");
            }
        }
    }
}

impl<K: AsRef<[u8]>, V> FromIterator<(K, V)> for HatTrie<V> {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut trie = HatTrie::new();
        trie.extend(iter);
        trie
    }
}


#[cfg(test)]
mod proptests;
