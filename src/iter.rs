//! Depth-first traversal over nodes and containers.
//!
//! Node edges are always visited in ascending byte order, and a node's own
//! value comes before anything below it. The two [`Order`]s differ only in
//! how the entries of one container are yielded.

use smallvec::SmallVec;

use crate::container::Pos;
use crate::node::{Child, ContainerId, NodeId, FANOUT};
use crate::HatTrie;

/// Entry order within a container.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Order {
    /// Fully lexicographic: byte-wise, shorter key first on a shared prefix.
    #[default]
    Sorted,
    /// Lexicographic across containers but storage order within one.
    /// Cheaper: no per-container sort.
    Unsorted,
}

#[derive(Clone, Copy)]
struct Frame {
    node: NodeId,
    /// Next edge byte to try; `FANOUT` once exhausted.
    next: u16,
}

/// Sub-cursor over the container currently being visited.
enum Leaf {
    Storage { id: ContainerId, next: Option<Pos> },
    Sorted {
        id: ContainerId,
        positions: std::vec::IntoIter<Pos>,
    },
}

impl Leaf {
    fn next<V>(&mut self, trie: &HatTrie<V>) -> Option<(ContainerId, Pos)> {
        match self {
            Leaf::Storage { id, next } => {
                let pos = (*next)?;
                *next = trie.containers.get(id.0).after(pos);
                Some((*id, pos))
            }
            Leaf::Sorted { id, positions } => positions.next().map(|pos| (*id, pos)),
        }
    }
}

#[derive(Clone, Copy)]
enum Current {
    Node(NodeId),
    Entry(ContainerId, Pos),
}

/// Traversal state that does not borrow the trie; every step takes the trie
/// explicitly so both shared and mutable front-ends can drive it.
struct RawCursor {
    order: Order,
    stack: SmallVec<[Frame; 16]>,
    /// Edge bytes leading to the top frame, plus the container edge while a
    /// leaf is active.
    path: Vec<u8>,
    leaf: Option<Leaf>,
    current: Option<Current>,
    /// Full key of `current`.
    key: Vec<u8>,
}

impl RawCursor {
    fn new<V>(trie: &HatTrie<V>, order: Order) -> Self {
        let mut stack = SmallVec::new();
        stack.push(Frame {
            node: trie.root,
            next: 0,
        });
        let mut cursor = Self {
            order,
            stack,
            path: Vec::new(),
            leaf: None,
            current: None,
            key: Vec::new(),
        };
        if trie.nodes.get(trie.root.0).value.is_some() {
            cursor.current = Some(Current::Node(trie.root));
        } else {
            cursor.advance(trie);
        }
        cursor
    }

    #[inline]
    fn is_finished(&self) -> bool {
        self.current.is_none()
    }

    fn advance<V>(&mut self, trie: &HatTrie<V>) {
        self.current = None;
        loop {
            if let Some(leaf) = &mut self.leaf {
                if let Some((id, pos)) = leaf.next(trie) {
                    self.key.clear();
                    self.key.extend_from_slice(&self.path);
                    self.key
                        .extend_from_slice(trie.containers.get(id.0).suffix(pos));
                    self.current = Some(Current::Entry(id, pos));
                    return;
                }
                self.leaf = None;
                self.path.pop();
            }

            let Some(frame) = self.stack.last_mut() else {
                return;
            };
            if frame.next as usize == FANOUT {
                self.stack.pop();
                // Only the root frame was reached without an edge byte.
                if !self.stack.is_empty() {
                    self.path.pop();
                }
                continue;
            }
            let byte = frame.next as u8;
            frame.next += 1;

            match trie.nodes.get(frame.node.0).child(byte) {
                None => {}
                Some(Child::Node(node)) => {
                    self.path.push(byte);
                    self.stack.push(Frame { node, next: 0 });
                    if trie.nodes.get(node.0).value.is_some() {
                        self.key.clear();
                        self.key.extend_from_slice(&self.path);
                        self.current = Some(Current::Node(node));
                        return;
                    }
                }
                Some(Child::Container(id)) => {
                    self.path.push(byte);
                    let container = trie.containers.get(id.0);
                    self.leaf = Some(match self.order {
                        Order::Unsorted => Leaf::Storage {
                            id,
                            next: container.first(),
                        },
                        Order::Sorted => Leaf::Sorted {
                            id,
                            positions: container.sorted_positions().into_iter(),
                        },
                    });
                }
            }
        }
    }

    #[inline]
    fn key(&self) -> Option<&[u8]> {
        self.current.map(|_| self.key.as_slice())
    }

    fn value<'t, V>(&self, trie: &'t HatTrie<V>) -> Option<&'t V> {
        match self.current? {
            Current::Node(id) => trie.nodes.get(id.0).value.as_ref(),
            Current::Entry(id, pos) => Some(trie.containers.get(id.0).value(pos)),
        }
    }

    fn value_mut<'t, V>(&self, trie: &'t mut HatTrie<V>) -> Option<&'t mut V> {
        match self.current? {
            Current::Node(id) => trie.nodes.get_mut(id.0).value.as_mut(),
            Current::Entry(id, pos) => Some(trie.containers.get_mut(id.0).value_mut(pos)),
        }
    }
}

// =============================================================================
// Iter / Keys
// =============================================================================

/// Iterator over `(key, &value)` pairs. Created by [`HatTrie::iter`] and
/// [`HatTrie::iter_unsorted`].
///
/// Keys are copied out because they are assembled in a buffer that the next
/// step overwrites.
pub struct Iter<'a, V> {
    trie: &'a HatTrie<V>,
    raw: RawCursor,
    remaining: usize,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (Vec<u8>, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.raw.value(self.trie)?;
        let key = self.raw.key()?.to_vec();
        self.raw.advance(self.trie);
        self.remaining -= 1;
        Some((key, value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V> ExactSizeIterator for Iter<'_, V> {}

/// Iterator over keys in sorted order. Created by [`HatTrie::keys`].
pub struct Keys<'a, V> {
    inner: Iter<'a, V>,
}

impl<V> Iterator for Keys<'_, V> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<V> ExactSizeIterator for Keys<'_, V> {}

// =============================================================================
// Cursor
// =============================================================================

/// Forward-only cursor with mutable access to values. Created by
/// [`HatTrie::cursor`].
///
/// The cursor holds the trie mutably, so the structure cannot change while it
/// is live. The slice returned by [`Cursor::key`] borrows the cursor and is
/// gone after the next [`Cursor::advance`]; copy it to keep it. Sort buffers
/// and the traversal stack are released when the cursor is dropped.
pub struct Cursor<'a, V> {
    trie: &'a mut HatTrie<V>,
    raw: RawCursor,
}

impl<V> Cursor<'_, V> {
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.raw.is_finished()
    }

    /// Moves to the next entry. Does nothing once finished.
    pub fn advance(&mut self) {
        if !self.raw.is_finished() {
            self.raw.advance(&*self.trie);
        }
    }

    /// Key of the current entry, or `None` once finished.
    pub fn key(&self) -> Option<&[u8]> {
        self.raw.key()
    }

    pub fn value(&self) -> Option<&V> {
        self.raw.value(&*self.trie)
    }

    pub fn value_mut(&mut self) -> Option<&mut V> {
        self.raw.value_mut(&mut *self.trie)
    }
}

impl<V> HatTrie<V> {
    /// Iterates in sorted key order.
    pub fn iter(&self) -> Iter<'_, V> {
        self.iter_with(Order::Sorted)
    }

    /// Iterates without sorting container contents. Keys sharing a container
    /// come out in storage order.
    pub fn iter_unsorted(&self) -> Iter<'_, V> {
        self.iter_with(Order::Unsorted)
    }

    pub fn iter_with(&self, order: Order) -> Iter<'_, V> {
        Iter {
            trie: self,
            raw: RawCursor::new(self, order),
            remaining: self.len,
        }
    }

    pub fn keys(&self) -> Keys<'_, V> {
        Keys { inner: self.iter() }
    }

    /// Opens a cursor positioned at the first entry in `order`.
    pub fn cursor(&mut self, order: Order) -> Cursor<'_, V> {
        let raw = RawCursor::new(self, order);
        Cursor { trie: self, raw }
    }
}

impl<'a, V> IntoIterator for &'a HatTrie<V> {
    type Item = (Vec<u8>, &'a V);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
