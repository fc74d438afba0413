//! Prefix enumeration along a single query path.
//!
//! A walk follows the query byte by byte from the root and reports every
//! stored key that is a prefix of the query. Shorter matches sit higher in
//! the trie, so they are reported first. Once the path reaches a container,
//! only the suffixes that are prefixes of the remaining query tail are looked
//! up; other container members are never touched.

use std::ops::ControlFlow;

use smallvec::SmallVec;

use crate::container::Pos;
use crate::node::Child;
use crate::HatTrie;

impl<V> HatTrie<V> {
    /// Calls `f` with every stored key that is a prefix of `query`, in
    /// increasing length order, together with a mutable reference to its
    /// value. Returning [`ControlFlow::Break`] stops the walk.
    ///
    /// The walk also stops at the first query byte without an edge. Walking an
    /// empty trie, or a query that matches nothing, never calls `f`.
    pub fn walk<F>(&mut self, query: &[u8], mut f: F)
    where
        F: FnMut(&[u8], &mut V) -> ControlFlow<()>,
    {
        let mut node = self.root;
        let mut depth = 0;
        loop {
            if let Some(value) = self.nodes.get_mut(node.0).value.as_mut() {
                if f(&query[..depth], value).is_break() {
                    return;
                }
            }
            let Some(&byte) = query.get(depth) else {
                return;
            };
            match self.nodes.get(node.0).child(byte) {
                None => return,
                Some(Child::Node(next)) => {
                    node = next;
                    depth += 1;
                }
                Some(Child::Container(id)) => {
                    let tail = &query[depth + 1..];
                    // Positions stay valid: callbacks can only touch values.
                    let hits: SmallVec<[(usize, Pos); 8]> =
                        self.containers.get(id.0).prefixes_of(tail).collect();
                    let container = self.containers.get_mut(id.0);
                    for (n, pos) in hits {
                        if f(&query[..depth + 1 + n], container.value_mut(pos)).is_break() {
                            return;
                        }
                    }
                    return;
                }
            }
        }
    }

    /// Returns the length and value of the longest stored key that is a
    /// prefix of `query`.
    pub fn longest_prefix(&self, query: &[u8]) -> Option<(usize, &V)> {
        let mut best = None;
        let mut node = self.root;
        let mut depth = 0;
        loop {
            if let Some(value) = self.nodes.get(node.0).value.as_ref() {
                best = Some((depth, value));
            }
            let Some(&byte) = query.get(depth) else {
                return best;
            };
            match self.nodes.get(node.0).child(byte) {
                None => return best,
                Some(Child::Node(next)) => {
                    node = next;
                    depth += 1;
                }
                Some(Child::Container(id)) => {
                    let container = self.containers.get(id.0);
                    let longest = container
                        .prefixes_of(&query[depth + 1..])
                        .last()
                        .map(|(n, pos)| (depth + 1 + n, container.value(pos)));
                    return longest.or(best);
                }
            }
        }
    }
}
