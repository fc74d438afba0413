//! Array-hash burst container.
//!
//! A container stores the suffixes left over after the trie edges leading to
//! it, together with their values. Suffixes are hashed into slots; each slot
//! packs its suffixes back to back in one byte buffer
//! (`[len:1-2][suffix...]`) with the values held in a parallel vector, so a
//! lookup is one hash plus a short sequential scan.
//!
//! The empty suffix cannot be hashed into a slot like the others and lives in
//! a dedicated value slot instead.

use std::cmp::Ordering;

use crate::config::Config;
use crate::error::Result;

/// Longest suffix a record header can describe.
pub(crate) const MAX_SUFFIX_LEN: usize = 0x7fff;

/// Average records per slot before the slot table doubles.
const MAX_LOAD: usize = 8;

// =============================================================================
// Record encoding
// =============================================================================
//
// Length header:
// - len < 0x80: [len:1]
// - otherwise:  [0x80 | len >> 8][len & 0xFF]

#[inline]
fn header_len(len: usize) -> usize {
    if len < 0x80 {
        1
    } else {
        2
    }
}

#[inline]
pub(crate) fn encoded_len(len: usize) -> usize {
    header_len(len) + len
}

#[inline]
fn write_record(buf: &mut Vec<u8>, suffix: &[u8]) {
    let len = suffix.len();
    debug_assert!(len <= MAX_SUFFIX_LEN);
    if len < 0x80 {
        buf.push(len as u8);
    } else {
        buf.push(0x80 | (len >> 8) as u8);
        buf.push(len as u8);
    }
    buf.extend_from_slice(suffix);
}

/// Returns `(suffix_len, header_len)` of the record starting at `at`.
#[inline]
fn read_header(buf: &[u8], at: usize) -> (usize, usize) {
    let b = buf[at];
    if b & 0x80 == 0 {
        (b as usize, 1)
    } else {
        ((((b & 0x7F) as usize) << 8) | buf[at + 1] as usize, 2)
    }
}

/// Walks the packed records of one slot, yielding `(offset, suffix)`.
struct Records<'a> {
    keys: &'a [u8],
    at: usize,
}

impl<'a> Iterator for Records<'a> {
    type Item = (usize, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.at >= self.keys.len() {
            return None;
        }
        let offset = self.at;
        let (len, hdr) = read_header(self.keys, offset);
        let start = offset + hdr;
        self.at = start + len;
        Some((offset, &self.keys[start..start + len]))
    }
}

#[inline]
fn records(keys: &[u8]) -> Records<'_> {
    Records { keys, at: 0 }
}

const FNV_OFFSET: u64 = 0xcbf29ce484222325;

/// One FNV-1a round. Hashing a suffix one byte longer costs one more round.
#[inline]
fn fnv_step(hash: u64, byte: u8) -> u64 {
    (hash ^ byte as u64).wrapping_mul(0x100000001b3)
}

/// FNV-1a over the suffix bytes.
#[inline]
fn hash_suffix(suffix: &[u8]) -> u64 {
    suffix.iter().fold(FNV_OFFSET, |hash, &byte| fnv_step(hash, byte))
}

// =============================================================================
// Container
// =============================================================================

#[derive(Clone)]
struct Slot<V> {
    keys: Vec<u8>,
    values: Vec<V>,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
        }
    }

    fn with_capacity(bytes: usize, n: usize) -> Result<Self> {
        let mut slot = Self::new();
        slot.keys.try_reserve_exact(bytes)?;
        slot.values.try_reserve_exact(n)?;
        Ok(slot)
    }

    /// Returns `(offset, index)` of the record equal to `suffix`.
    fn find(&self, suffix: &[u8]) -> Option<(usize, usize)> {
        let mut at = 0;
        let mut index = 0;
        while at < self.keys.len() {
            let (len, hdr) = read_header(&self.keys, at);
            let start = at + hdr;
            if len == suffix.len() && &self.keys[start..start + len] == suffix {
                return Some((at, index));
            }
            at = start + len;
            index += 1;
        }
        None
    }

    #[inline]
    fn push(&mut self, suffix: &[u8], value: V) -> (usize, usize) {
        let pos = (self.keys.len(), self.values.len());
        write_record(&mut self.keys, suffix);
        self.values.push(value);
        pos
    }
}

/// Location of one entry inside a container.
///
/// Stays valid until the container is next mutated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Pos {
    /// The zero-length suffix.
    Empty,
    Entry {
        slot: usize,
        /// Byte offset of the record header within the slot.
        offset: usize,
        /// Index into the slot's values.
        index: usize,
    },
}

/// Bounded leaf of the trie holding `(suffix, value)` pairs.
#[derive(Clone)]
pub(crate) struct Container<V> {
    slots: Vec<Slot<V>>,
    /// Value of the key ending exactly at this container's prefix.
    empty: Option<V>,
    count: usize,
    /// Encoded record bytes across all slots.
    total_bytes: usize,
    /// Upper bound on stored suffix lengths; removals do not lower it.
    max_suffix: usize,
}

/// Result of splitting a container on the leading byte of its suffixes.
pub(crate) struct Split<V> {
    /// Value whose suffix was empty; becomes the new node's own value.
    pub(crate) residual: Option<V>,
    /// Child containers, ascending by the byte they were split on.
    pub(crate) children: Vec<(u8, Container<V>)>,
}

impl<V> Container<V> {
    /// Creates an empty container with `n` hash slots (a power of two).
    pub(crate) fn with_slots(n: usize) -> Result<Self> {
        debug_assert!(n.is_power_of_two());
        let mut slots = Vec::new();
        slots.try_reserve_exact(n)?;
        slots.extend((0..n).map(|_| Slot::new()));
        Ok(Self {
            slots,
            empty: None,
            count: 0,
            total_bytes: 0,
            max_suffix: 0,
        })
    }

    /// Creates an empty container sized to receive `count` entries without growing.
    fn for_entries(count: usize, cfg: &Config) -> Result<Self> {
        let n = count
            .div_ceil(MAX_LOAD)
            .next_power_of_two()
            .max(cfg.initial_slots);
        Self::with_slots(n)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub(crate) fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    #[inline]
    pub(crate) fn max_suffix(&self) -> usize {
        self.max_suffix
    }

    #[inline]
    pub(crate) fn is_overfull(&self, cfg: &Config) -> bool {
        cfg.is_overfull(self.count, self.total_bytes)
    }

    #[inline]
    fn slot_of(&self, suffix: &[u8]) -> usize {
        self.slot_of_hash(hash_suffix(suffix))
    }

    #[inline]
    fn slot_of_hash(&self, hash: u64) -> usize {
        (hash as usize) & (self.slots.len() - 1)
    }

    pub(crate) fn find(&self, suffix: &[u8]) -> Option<Pos> {
        self.find_hashed(hash_suffix(suffix), suffix)
    }

    /// Like [`Self::find`], with `hash` already computed by [`hash_suffix`].
    fn find_hashed(&self, hash: u64, suffix: &[u8]) -> Option<Pos> {
        if suffix.is_empty() {
            return self.empty.as_ref().map(|_| Pos::Empty);
        }
        if suffix.len() > self.max_suffix {
            return None;
        }
        let slot = self.slot_of_hash(hash);
        self.slots[slot]
            .find(suffix)
            .map(|(offset, index)| Pos::Entry {
                slot,
                offset,
                index,
            })
    }

    pub(crate) fn get(&self, suffix: &[u8]) -> Option<&V> {
        self.find(suffix).map(|pos| self.value(pos))
    }

    pub(crate) fn get_mut(&mut self, suffix: &[u8]) -> Option<&mut V> {
        let pos = self.find(suffix)?;
        Some(self.value_mut(pos))
    }

    pub(crate) fn suffix(&self, pos: Pos) -> &[u8] {
        match pos {
            Pos::Empty => &[],
            Pos::Entry { slot, offset, .. } => {
                let keys = &self.slots[slot].keys;
                let (len, hdr) = read_header(keys, offset);
                &keys[offset + hdr..offset + hdr + len]
            }
        }
    }

    pub(crate) fn value(&self, pos: Pos) -> &V {
        match pos {
            Pos::Empty => self.empty.as_ref().expect("stale empty-suffix position"),
            Pos::Entry { slot, index, .. } => &self.slots[slot].values[index],
        }
    }

    pub(crate) fn value_mut(&mut self, pos: Pos) -> &mut V {
        match pos {
            Pos::Empty => self.empty.as_mut().expect("stale empty-suffix position"),
            Pos::Entry { slot, index, .. } => &mut self.slots[slot].values[index],
        }
    }

    /// Stores a suffix that is not yet present.
    ///
    /// All allocation happens before the entry is written, so on error the
    /// container is unchanged apart from a possibly larger slot table.
    pub(crate) fn insert(&mut self, suffix: &[u8], value: V) -> Result<Pos> {
        debug_assert!(self.find(suffix).is_none());
        if !suffix.is_empty() {
            if self.count + 1 > self.slots.len() * MAX_LOAD {
                self.grow()?;
            }
            let idx = self.slot_of(suffix);
            let slot = &mut self.slots[idx];
            slot.keys.try_reserve(encoded_len(suffix.len()))?;
            slot.values.try_reserve(1)?;
        }
        Ok(self.push_reserved(suffix, value))
    }

    /// Writes an entry into capacity reserved beforehand.
    fn push_reserved(&mut self, suffix: &[u8], value: V) -> Pos {
        self.count += 1;
        if suffix.is_empty() {
            debug_assert!(self.empty.is_none());
            self.empty = Some(value);
            return Pos::Empty;
        }
        self.total_bytes += encoded_len(suffix.len());
        self.max_suffix = self.max_suffix.max(suffix.len());
        let slot = self.slot_of(suffix);
        let (offset, index) = self.slots[slot].push(suffix, value);
        Pos::Entry {
            slot,
            offset,
            index,
        }
    }

    pub(crate) fn remove(&mut self, suffix: &[u8]) -> Option<V> {
        let pos = self.find(suffix)?;
        self.count -= 1;
        match pos {
            Pos::Empty => self.empty.take(),
            Pos::Entry {
                slot,
                offset,
                index,
            } => {
                let enc = encoded_len(suffix.len());
                let slot = &mut self.slots[slot];
                slot.keys.drain(offset..offset + enc);
                self.total_bytes -= enc;
                Some(slot.values.remove(index))
            }
        }
    }

    /// Doubles the slot table and rehashes every record into it.
    fn grow(&mut self) -> Result<()> {
        let n = self.slots.len() * 2;
        let mask = n - 1;

        let mut needs: Vec<(usize, usize)> = Vec::new();
        needs.try_reserve_exact(n)?;
        needs.resize(n, (0, 0));
        for slot in &self.slots {
            for (_, suffix) in records(&slot.keys) {
                let need = &mut needs[(hash_suffix(suffix) as usize) & mask];
                need.0 += encoded_len(suffix.len());
                need.1 += 1;
            }
        }

        let mut slots = Vec::new();
        slots.try_reserve_exact(n)?;
        for &(bytes, count) in &needs {
            slots.push(Slot::with_capacity(bytes, count)?);
        }

        for old in std::mem::take(&mut self.slots) {
            for ((_, suffix), value) in records(&old.keys).zip(old.values) {
                slots[(hash_suffix(suffix) as usize) & mask].push(suffix, value);
            }
        }
        self.slots = slots;
        Ok(())
    }

    /// First entry in storage order; the empty suffix comes first.
    pub(crate) fn first(&self) -> Option<Pos> {
        if self.empty.is_some() {
            return Some(Pos::Empty);
        }
        self.scan_from(0, 0, 0)
    }

    /// Entry following `pos` in storage order.
    pub(crate) fn after(&self, pos: Pos) -> Option<Pos> {
        match pos {
            Pos::Empty => self.scan_from(0, 0, 0),
            Pos::Entry {
                slot,
                offset,
                index,
            } => {
                let (len, hdr) = read_header(&self.slots[slot].keys, offset);
                self.scan_from(slot, offset + hdr + len, index + 1)
            }
        }
    }

    fn scan_from(&self, mut slot: usize, mut offset: usize, mut index: usize) -> Option<Pos> {
        while slot < self.slots.len() {
            if offset < self.slots[slot].keys.len() {
                return Some(Pos::Entry {
                    slot,
                    offset,
                    index,
                });
            }
            slot += 1;
            offset = 0;
            index = 0;
        }
        None
    }

    /// Every entry position, ordered by suffix (shorter first on a tie).
    pub(crate) fn sorted_positions(&self) -> Vec<Pos> {
        let mut positions = Vec::with_capacity(self.count);
        let mut pos = self.first();
        while let Some(p) = pos {
            positions.push(p);
            pos = self.after(p);
        }
        positions.sort_unstable_by(|&a, &b| compare_keys(self.suffix(a), self.suffix(b)));
        positions
    }

    /// Entries whose suffix is a prefix of `tail`, as `(suffix_len, pos)`,
    /// shortest first.
    ///
    /// The hash is extended one byte per candidate length, so the whole scan
    /// hashes `tail` once.
    pub(crate) fn prefixes_of<'a>(
        &'a self,
        tail: &'a [u8],
    ) -> impl Iterator<Item = (usize, Pos)> + 'a {
        let empty = self.empty.as_ref().map(|_| (0, Pos::Empty));
        let mut hash = FNV_OFFSET;
        let longest = tail.len().min(self.max_suffix);
        empty.into_iter().chain((1..=longest).filter_map(move |n| {
            hash = fnv_step(hash, tail[n - 1]);
            self.find_hashed(hash, &tail[..n]).map(|pos| (n, pos))
        }))
    }

    /// Entries in storage order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&[u8], &V)> {
        let empty = self.empty.as_ref().map(|v| (&[] as &[u8], v));
        empty.into_iter().chain(
            self.slots
                .iter()
                .flat_map(|slot| records(&slot.keys).map(|(_, s)| s).zip(slot.values.iter())),
        )
    }

    /// Allocates every child container needed to split this one, without
    /// moving any entry.
    pub(crate) fn prepare_split(&self, cfg: &Config) -> Result<Split<V>> {
        let mut counts = [0usize; 256];
        for (suffix, _) in self.iter() {
            if let Some(&b) = suffix.first() {
                counts[b as usize] += 1;
            }
        }

        let mut children = Vec::new();
        children.try_reserve_exact(counts.iter().filter(|&&c| c > 0).count())?;
        let mut child_of = [usize::MAX; 256];
        for (b, &count) in counts.iter().enumerate() {
            if count > 0 {
                child_of[b] = children.len();
                children.push((b as u8, Container::for_entries(count, cfg)?));
            }
        }

        // Reserve each child slot exactly, so moving entries cannot fail.
        let mut needs: Vec<Vec<(usize, usize)>> = Vec::new();
        needs.try_reserve_exact(children.len())?;
        for (_, child) in &children {
            let mut need = Vec::new();
            need.try_reserve_exact(child.slots.len())?;
            need.resize(child.slots.len(), (0, 0));
            needs.push(need);
        }
        for (suffix, _) in self.iter() {
            let Some((&b, rest)) = suffix.split_first() else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            let c = child_of[b as usize];
            let slot = children[c].1.slot_of(rest);
            needs[c][slot].0 += encoded_len(rest.len());
            needs[c][slot].1 += 1;
        }
        for ((_, child), need) in children.iter_mut().zip(&needs) {
            for (slot, &(bytes, n)) in child.slots.iter_mut().zip(need) {
                slot.keys.try_reserve_exact(bytes)?;
                slot.values.try_reserve_exact(n)?;
            }
        }

        Ok(Split {
            residual: None,
            children,
        })
    }

    /// Moves every entry into the children allocated by [`Self::prepare_split`],
    /// stripping the leading byte of each suffix.
    pub(crate) fn split_into(self, mut split: Split<V>) -> Split<V> {
        split.residual = self.empty;
        for slot in self.slots {
            for ((_, suffix), value) in records(&slot.keys).zip(slot.values) {
                let (b, rest) = (suffix[0], &suffix[1..]);
                let c = split
                    .children
                    .binary_search_by_key(&b, |(cb, _)| *cb)
                    .expect("split child allocated for every leading byte");
                split.children[c].1.push_reserved(rest, value);
            }
        }
        split
    }

    /// Heap bytes owned by this container.
    pub(crate) fn memory_usage(&self) -> usize {
        self.slots.capacity() * std::mem::size_of::<Slot<V>>()
            + self
                .slots
                .iter()
                .map(|s| s.keys.capacity() + s.values.capacity() * std::mem::size_of::<V>())
                .sum::<usize>()
    }
}

/// Byte-wise comparison; on a common prefix the shorter key sorts first.
#[inline]
pub(crate) fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    let n = a.len().min(b.len());
    match a[..n].cmp(&b[..n]) {
        Ordering::Equal => a.len().cmp(&b.len()),
        ord => ord,
    }
}
