//! Index-addressed storage for trie nodes and containers.
//!
//! Parents refer to children by `u32` slot index instead of owning pointers,
//! so a container can be swapped for a node by rewriting one edge.

use crate::error::Result;

/// Slab with a free list. Freed slots are reused by later allocations.
#[derive(Clone)]
pub(crate) struct Arena<T> {
    slots: Vec<Option<T>>,
    /// Indices of vacant slots.
    free: Vec<u32>,
    live: usize,
}

impl<T> Arena<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Number of occupied slots.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Make room for `additional` allocations without reallocating.
    pub(crate) fn reserve(&mut self, additional: usize) -> Result<()> {
        let reusable = self.free.len().min(additional);
        self.slots.try_reserve(additional - reusable)?;
        Ok(())
    }

    pub(crate) fn alloc(&mut self, item: T) -> Result<u32> {
        if let Some(idx) = self.free.pop() {
            debug_assert!(self.slots[idx as usize].is_none());
            self.slots[idx as usize] = Some(item);
            self.live += 1;
            return Ok(idx);
        }
        self.slots.try_reserve(1)?;
        let idx = self.slots.len() as u32;
        self.slots.push(Some(item));
        self.live += 1;
        Ok(idx)
    }

    pub(crate) fn free(&mut self, idx: u32) -> Option<T> {
        let item = self.slots.get_mut(idx as usize)?.take()?;
        self.live -= 1;
        // Losing a free-list entry only leaks one vacant slot.
        if self.free.try_reserve(1).is_ok() {
            self.free.push(idx);
        }
        Some(item)
    }

    #[inline]
    pub(crate) fn get(&self, idx: u32) -> &T {
        match &self.slots[idx as usize] {
            Some(item) => item,
            None => panic!("dangling arena index {idx}"),
        }
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, idx: u32) -> &mut T {
        match &mut self.slots[idx as usize] {
            Some(item) => item,
            None => panic!("dangling arena index {idx}"),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|item| (i as u32, item)))
    }

    /// Drops every slot at index `len` or above. Slots below `len` must all
    /// be occupied.
    pub(crate) fn truncate(&mut self, len: usize) {
        debug_assert!(self.slots.iter().take(len).all(Option::is_some));
        self.slots.truncate(len);
        self.free.clear();
        self.live = self.slots.len();
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.live = 0;
    }

    pub(crate) fn shrink_to_fit(&mut self) {
        self.slots.shrink_to_fit();
        self.free.shrink_to_fit();
    }

    /// Bytes held by the slot table itself (not by what the items own).
    pub(crate) fn capacity_bytes(&self) -> usize {
        self.slots.capacity() * std::mem::size_of::<Option<T>>() + self.free.capacity() * 4
    }
}
