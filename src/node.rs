//! Trie nodes and the tagged edges between them.

use crate::error::Result;

/// Edges per node, one per byte value.
pub(crate) const FANOUT: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct NodeId(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ContainerId(pub(crate) u32);

/// Target of a node edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Child {
    Node(NodeId),
    Container(ContainerId),
}

/// Byte-indexed branch.
///
/// `value` holds the key whose bytes are exactly the path from the root to
/// this node.
#[derive(Clone)]
pub(crate) struct TrieNode<V> {
    children: Box<[Option<Child>]>,
    pub(crate) value: Option<V>,
}

impl<V> TrieNode<V> {
    pub(crate) fn new() -> Result<Self> {
        let mut children = Vec::new();
        children.try_reserve_exact(FANOUT)?;
        children.resize(FANOUT, None);
        Ok(Self {
            children: children.into_boxed_slice(),
            value: None,
        })
    }

    /// Drops every edge and the value, keeping the edge table's storage.
    pub(crate) fn reset(&mut self) {
        self.children.fill(None);
        self.value = None;
    }

    #[inline]
    pub(crate) fn child(&self, byte: u8) -> Option<Child> {
        self.children[byte as usize]
    }

    #[inline]
    pub(crate) fn set_child(&mut self, byte: u8, child: Option<Child>) {
        self.children[byte as usize] = child;
    }

    /// Present edges in ascending byte order.
    pub(crate) fn children(&self) -> impl Iterator<Item = (u8, Child)> + '_ {
        self.children
            .iter()
            .enumerate()
            .filter_map(|(b, c)| c.map(|c| (b as u8, c)))
    }

    pub(crate) fn memory_usage(&self) -> usize {
        self.children.len() * std::mem::size_of::<Option<Child>>()
    }
}
