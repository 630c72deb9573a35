//! # Cursor usage
//!
//! A cursor walks one map in sorted key order, in either direction.  It
//! borrows the map immutably for its whole life, so the map cannot be
//! mutated while any cursor exists.
//!
//! A fresh cursor sits before the first key; [next](HatCursor::next) then
//! lands on the first key.  [seek](HatCursor::seek) jumps to the smallest
//! key greater than or equal to a probe, [last](HatCursor::last) to the
//! greatest key, and [prev](HatCursor::prev) steps backward.  All four
//! report whether the cursor ended up positioned on a key.
//!
//! The skeleton (boot plus radix levels) is walked slot by slot, while a
//! whole leaf container (array, pail or bucket) is flattened and sorted on
//! arrival.  Most traversals visit each leaf once, which makes this lazy
//! sort cheaper than keeping leaves ordered eagerly.

use smallvec::SmallVec;

use crate::arena::CLASS_ARRAY0;
use crate::array_node;
use crate::bucket_node;
use crate::pail_node;
use crate::radix_node;
use crate::slot::{NodeTag, Slot};
use crate::trie::HatMap;
use crate::utils::read_prefix;

/// Size of node stack to preallocate in the cursor
const EXPECTED_DEPTH: usize = 16;

/// Insertion sort takes over below this many entries
const SORT_CUTOFF: usize = 10;

/// One descended skeleton node: its slot array and the digit the walk
/// currently rests on
#[derive(Clone, Copy)]
struct Level {
    slots: *const Slot,
    len: usize,
    scan: isize,
}

/// One flattened (residue, aux) pair of the current leaf
#[derive(Clone, Copy)]
struct SortEntry {
    /// The residue's length prefix inside its array node
    prefix_ptr: *const u8,
    aux_ptr: *const u8,
}

impl SortEntry {
    /// SAFETY: the node holding this entry must still be live
    #[inline]
    unsafe fn residue<'a>(self) -> &'a [u8] {
        let (len, skip) = read_prefix(self.prefix_ptr);
        core::slice::from_raw_parts(self.prefix_ptr.add(skip), len)
    }

    /// Byte rank at sort offset `o`; exhausted residues rank below byte 0
    #[inline]
    unsafe fn rank(self, o: usize) -> i32 {
        let r = self.residue();
        if o < r.len() {
            r[o] as i32
        } else {
            -1
        }
    }

    #[inline]
    unsafe fn tail<'a>(self, o: usize) -> &'a [u8] {
        let r = self.residue();
        &r[o.min(r.len())..]
    }
}

/// A bidirectional sort cursor over a [HatMap]
///
/// ```
/// let mut map = hatmap::HatMap::new(0, 0);
/// map.cell(b"banana");
/// map.cell(b"apple");
///
/// let mut cursor = map.cursor();
/// assert!(cursor.next());
/// assert_eq!(cursor.key(), b"apple");
/// assert!(cursor.next());
/// assert_eq!(cursor.key(), b"banana");
/// assert!(!cursor.next());
/// ```
pub struct HatCursor<'a> {
    map: &'a HatMap,
    /// Stack of descended skeleton nodes; level 0 is the boot root
    levels: SmallVec<[Level; EXPECTED_DEPTH]>,
    /// The current leaf, flattened and sorted by residue
    entries: Vec<SortEntry>,
    idx: usize,
    in_leaf: bool,
}

impl<'a> HatCursor<'a> {
    pub(crate) fn new(map: &'a HatMap) -> Self {
        let mut cursor = HatCursor {
            map,
            levels: SmallVec::new(),
            entries: Vec::new(),
            idx: 0,
            in_leaf: false,
        };
        cursor.rewind_to(-1);
        cursor
    }

    /// Whether the cursor currently rests on a key
    #[inline]
    pub fn is_positioned(&self) -> bool {
        self.in_leaf
    }

    /// Advances to the next key in ascending order.  Returns `false` once
    /// the keys are exhausted.
    pub fn next(&mut self) -> bool {
        if self.in_leaf && self.idx + 1 < self.entries.len() {
            self.idx += 1;
            return true;
        }
        self.in_leaf = false;
        while let Some(depth) = self.levels.len().checked_sub(1) {
            let Level { slots, len, scan } = self.levels[depth];
            let mut advanced = None;
            let mut i = scan + 1;
            while (i as usize) < len {
                //SAFETY: the level spans `len` slots of a live node
                let slot = unsafe { *slots.add(i as usize) };
                if !slot.is_empty() {
                    advanced = Some((i, slot));
                    break;
                }
                i += 1;
            }
            match advanced {
                Some((i, slot)) => {
                    self.levels[depth].scan = i;
                    if self.descend(slot, true) {
                        return true;
                    }
                }
                None => {
                    self.levels.pop();
                }
            }
        }
        false
    }

    /// Retreats to the previous key.  Returns `false` at the beginning.
    pub fn prev(&mut self) -> bool {
        if self.in_leaf && self.idx > 0 {
            self.idx -= 1;
            return true;
        }
        self.in_leaf = false;
        while let Some(depth) = self.levels.len().checked_sub(1) {
            let Level { slots, scan, .. } = self.levels[depth];
            let mut retreated = None;
            let mut i = scan - 1;
            while i >= 0 {
                //SAFETY: as in [Self::next]
                let slot = unsafe { *slots.add(i as usize) };
                if !slot.is_empty() {
                    retreated = Some((i, slot));
                    break;
                }
                i -= 1;
            }
            match retreated {
                Some((i, slot)) => {
                    self.levels[depth].scan = i;
                    if self.descend(slot, false) {
                        return true;
                    }
                }
                None => {
                    self.levels.pop();
                }
            }
        }
        false
    }

    /// Positions at the greatest key.  Returns `false` on an empty map.
    pub fn last(&mut self) -> bool {
        self.rewind_to(self.map.cfg.root_slots() as isize);
        self.prev()
    }

    /// Positions at the smallest key `>= key`, advancing into later
    /// subtrees when the probe's own subtree is exhausted.  Returns `false`
    /// when every stored key is smaller.
    pub fn seek(&mut self, key: &[u8]) -> bool {
        let (boot, mut off) = self.map.boot_index(key);
        self.rewind_to(boot as isize);

        //SAFETY: the walk only reads live nodes reachable from the root
        let mut slot = unsafe { *self.map.root_base().add(boot) };
        if slot.is_empty() {
            return self.next();
        }

        // Mirrors the key digit by digit; the first divergence from the
        // probe clears `exact`, after which only the leftmost subtree
        // matters.
        let mut exact = true;
        loop {
            if slot.tag() == NodeTag::Radix {
                let base = slot.ptr();
                let start = if exact && off < key.len() {
                    let c = (key[off] & 0x7f) as usize;
                    off += 1;
                    c
                } else {
                    0
                };
                let mut found = None;
                for ch in start..128 {
                    //SAFETY: radix nodes span 128 slots
                    if !unsafe { *radix_node::slot_at(base, ch) }.is_empty() {
                        found = Some(ch);
                        break;
                    }
                }
                let Some(ch) = found else { return self.next() };
                if ch != start {
                    exact = false;
                }
                self.levels.push(Level {
                    slots: base as *const Slot,
                    len: 128,
                    scan: ch as isize,
                });
                //SAFETY: found slot is in range
                slot = unsafe { *radix_node::slot_at(base, ch) };
            } else {
                self.materialize(slot);
                if exact {
                    let suffix = &key[off..];
                    //SAFETY: entries point into live leaf nodes
                    let pos = self
                        .entries
                        .partition_point(|e| unsafe { e.residue() } < suffix);
                    if pos < self.entries.len() {
                        self.idx = pos;
                        self.in_leaf = true;
                        return true;
                    }
                    return self.next();
                }
                if self.entries.is_empty() {
                    return self.next();
                }
                self.idx = 0;
                self.in_leaf = true;
                return true;
            }
        }
    }

    /// Reconstructs the current key into `buf`, truncating at its length.
    /// Returns the number of bytes written, zero when unpositioned.
    pub fn key_into(&self, buf: &mut [u8]) -> usize {
        if !self.in_leaf {
            return 0;
        }
        let mut off = 0;
        let boot = self.levels[0].scan as usize;
        for d in (0..self.map.cfg.boot_levels).rev() {
            let ch = ((boot >> (7 * d)) & 0x7f) as u8;
            if ch != 0 && off < buf.len() {
                buf[off] = ch;
                off += 1;
            }
        }
        for level in &self.levels[1..] {
            let ch = level.scan as u8;
            if ch != 0 && off < buf.len() {
                buf[off] = ch;
                off += 1;
            }
        }
        //SAFETY: positioned cursors hold entries of live leaf nodes
        let res = unsafe { self.entries[self.idx].residue() };
        let take = res.len().min(buf.len() - off);
        buf[off..off + take].copy_from_slice(&res[..take]);
        off + take
    }

    /// The current key as an owned vector, empty when unpositioned
    pub fn key(&self) -> Vec<u8> {
        if !self.in_leaf {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(32);
        let boot = self.levels[0].scan as usize;
        for d in (0..self.map.cfg.boot_levels).rev() {
            let ch = ((boot >> (7 * d)) & 0x7f) as u8;
            if ch != 0 {
                out.push(ch);
            }
        }
        for level in &self.levels[1..] {
            let ch = level.scan as u8;
            if ch != 0 {
                out.push(ch);
            }
        }
        //SAFETY: as in [Self::key_into]
        out.extend_from_slice(unsafe { self.entries[self.idx].residue() });
        out
    }

    /// The payload region of the current key.  The reference stays valid
    /// for as long as the map is borrowed, even after the cursor moves.
    pub fn aux(&self) -> Option<&'a [u8]> {
        if !self.in_leaf {
            return None;
        }
        let e = self.entries[self.idx];
        //SAFETY: aux_ptr spans `aux` bytes of a live leaf node, and the
        // map cannot be mutated while it is borrowed for 'a
        Some(unsafe { core::slice::from_raw_parts(e.aux_ptr, self.map.cfg.aux) })
    }

    fn rewind_to(&mut self, scan: isize) {
        self.levels.clear();
        self.levels.push(Level {
            slots: self.map.root_base(),
            len: self.map.cfg.root_slots(),
            scan,
        });
        self.entries.clear();
        self.idx = 0;
        self.in_leaf = false;
    }

    /// Walks radix children toward the first (or last) leaf below `slot`
    /// and flattens it.  Returns `false` for an empty leaf, which only the
    /// pristine root bucket can be.
    fn descend(&mut self, mut slot: Slot, forward: bool) -> bool {
        loop {
            if slot.tag() == NodeTag::Radix {
                let base = slot.ptr();
                let mut found = None;
                let mut ch = if forward { 0isize } else { 127 };
                while (0..128).contains(&ch) {
                    //SAFETY: radix nodes span 128 slots
                    if !unsafe { *radix_node::slot_at(base, ch as usize) }.is_empty() {
                        found = Some(ch);
                        break;
                    }
                    ch += if forward { 1 } else { -1 };
                }
                let Some(ch) = found else {
                    debug_assert!(false, "radix node with no children");
                    return false;
                };
                self.levels.push(Level {
                    slots: base as *const Slot,
                    len: 128,
                    scan: ch,
                });
                //SAFETY: found slot is in range
                slot = unsafe { *radix_node::slot_at(base, ch as usize) };
            } else {
                self.materialize(slot);
                if self.entries.is_empty() {
                    return false;
                }
                self.idx = if forward { 0 } else { self.entries.len() - 1 };
                self.in_leaf = true;
                return true;
            }
        }
    }

    /// Flattens every (residue, aux) pair at or below a leaf container into
    /// the scratch list and sorts it by residue
    fn materialize(&mut self, slot: Slot) {
        self.entries.clear();
        //SAFETY: nodes reachable from the root stay live and unmodified
        // while the cursor borrows the map
        unsafe {
            match slot.tag() {
                NodeTag::Array => self.strip_array(slot.ptr()),
                NodeTag::Pail => self.strip_pail(slot.ptr()),
                NodeTag::Bucket => {
                    for idx in 0..self.map.cfg.bucket_slots {
                        let child = *bucket_node::slot_at(slot.ptr(), idx);
                        if child.is_empty() {
                            continue;
                        }
                        match child.tag() {
                            NodeTag::Array => self.strip_array(child.ptr()),
                            NodeTag::Pail => self.strip_pail(child.ptr()),
                            other => debug_assert!(false, "bucket slot held a {other:?} node"),
                        }
                    }
                }
                NodeTag::Radix => debug_assert!(false, "radix nodes are walked, not flattened"),
            }
        }
        sort_entries(&mut self.entries, 0);
    }

    unsafe fn strip_array(&mut self, node: *const u8) {
        let cap = self
            .map
            .arena
            .class_bytes(CLASS_ARRAY0 + array_node::head(node).class as usize);
        for e in array_node::entries(node, cap, self.map.cfg.aux) {
            self.entries.push(SortEntry {
                prefix_ptr: e.prefix_ptr,
                aux_ptr: e.aux_ptr,
            });
        }
    }

    unsafe fn strip_pail(&mut self, pail: *mut u8) {
        for idx in 0..self.map.cfg.pail_slots {
            let child = *pail_node::slot_at(pail, idx);
            if !child.is_empty() {
                self.strip_array(child.ptr());
            }
        }
    }
}

/// Three-way byte quicksort over the rank at offset `o`, recursing into the
/// equal partition one byte deeper.  Residues exhausted at `o` rank first;
/// uniqueness guarantees at most one such entry per partition, so the equal
/// partition never needs a deeper pass for them.
fn sort_entries(list: &mut [SortEntry], o: usize) {
    if list.len() <= SORT_CUTOFF {
        insertion_sort(list, o);
        return;
    }
    //SAFETY: entries point into live leaf nodes for the sort's duration
    let pivot = unsafe {
        median3(
            list[0].rank(o),
            list[list.len() / 2].rank(o),
            list[list.len() - 1].rank(o),
        )
    };

    let (mut lt, mut i, mut gt) = (0usize, 0usize, list.len());
    while i < gt {
        let r = unsafe { list[i].rank(o) };
        if r < pivot {
            list.swap(lt, i);
            lt += 1;
            i += 1;
        } else if r > pivot {
            gt -= 1;
            list.swap(i, gt);
        } else {
            i += 1;
        }
    }
    sort_entries(&mut list[..lt], o);
    sort_entries(&mut list[gt..], o);
    if pivot >= 0 {
        sort_entries(&mut list[lt..gt], o + 1);
    } else {
        debug_assert!(gt - lt <= 1);
    }
}

fn insertion_sort(list: &mut [SortEntry], o: usize) {
    for i in 1..list.len() {
        let mut j = i;
        //SAFETY: as in [sort_entries]
        while j > 0 && unsafe { list[j - 1].tail(o) > list[j].tail(o) } {
            list.swap(j - 1, j);
            j -= 1;
        }
    }
}

#[inline]
fn median3(a: i32, b: i32, c: i32) -> i32 {
    a.min(b).max(a.max(b).min(c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HatConfig;

    fn collect_forward(map: &HatMap) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut cursor = map.cursor();
        while cursor.next() {
            out.push(cursor.key());
        }
        out
    }

    fn collect_backward(map: &HatMap) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut cursor = map.cursor();
        if cursor.last() {
            out.push(cursor.key());
            while cursor.prev() {
                out.push(cursor.key());
            }
        }
        out
    }

    #[test]
    fn empty_map_never_positions() {
        let map = HatMap::new(0, 0);
        let mut cursor = map.cursor();
        assert!(!cursor.seek(b"x"));
        assert!(!cursor.last());
        assert!(!cursor.next());
        assert!(!cursor.prev());
        assert_eq!(cursor.key_into(&mut [0u8; 8]), 0);
        assert!(cursor.aux().is_none());
    }

    #[test]
    fn two_keys_come_back_in_order() {
        for boot in [0, 1, 3] {
            let mut map = HatMap::new(boot, 0);
            map.cell(b"banana");
            map.cell(b"apple");
            assert_eq!(
                collect_forward(&map),
                vec![b"apple".to_vec(), b"banana".to_vec()],
                "boot {boot}"
            );
        }
    }

    #[test]
    fn backward_is_exact_reverse_of_forward() {
        let mut map = HatMap::new(2, 0);
        for key in ["m", "z", "a", "mm", "ma", "mz", "zzz", "ab", "b"] {
            map.cell(key.as_bytes());
        }
        let mut forward = collect_forward(&map);
        let backward = collect_backward(&map);
        forward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn seek_lands_on_key_or_successor() {
        let mut map = HatMap::new(0, 0);
        for key in ["bat", "cat", "catalog", "dog", "dot"] {
            map.cell(key.as_bytes());
        }
        let mut cursor = map.cursor();

        assert!(cursor.seek(b"cat"));
        assert_eq!(cursor.key(), b"cat");

        assert!(cursor.seek(b"casa"));
        assert_eq!(cursor.key(), b"cat");

        assert!(cursor.seek(b"catb"));
        assert_eq!(cursor.key(), b"dog");

        assert!(cursor.seek(b""));
        assert_eq!(cursor.key(), b"bat");

        assert!(!cursor.seek(b"zebra"));
    }

    #[test]
    fn seek_then_next_walks_the_tail() {
        let mut map = HatMap::new(3, 0);
        for key in ["alpha", "beta", "delta", "gamma"] {
            map.cell(key.as_bytes());
        }
        let mut cursor = map.cursor();
        assert!(cursor.seek(b"c"));
        assert_eq!(cursor.key(), b"delta");
        assert!(cursor.next());
        assert_eq!(cursor.key(), b"gamma");
        assert!(!cursor.next());
    }

    #[test]
    fn aux_follows_the_cursor() {
        let mut map = HatMap::new(0, 4);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            map.cell(key.as_bytes())
                .copy_from_slice(&(i as u32).to_le_bytes());
        }
        let mut cursor = map.cursor();
        let mut seen = Vec::new();
        while cursor.next() {
            let aux = cursor.aux().unwrap();
            seen.push(u32::from_le_bytes(aux.try_into().unwrap()));
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn bucket_leaves_sort_lazily() {
        let mut map = HatMap::new(0, 0);
        let mut keys: Vec<String> = (0..3000u64)
            .map(|i| format!("{:x}", i.wrapping_mul(2654435761)))
            .collect();
        keys.sort();
        keys.dedup();
        for key in &keys {
            map.cell(key.as_bytes());
        }
        let walked: Vec<Vec<u8>> = collect_forward(&map);
        let expect: Vec<Vec<u8>> = keys.iter().map(|k| k.as_bytes().to_vec()).collect();
        assert_eq!(walked, expect);
    }

    #[test]
    fn key_into_truncates_but_reports_written_length() {
        let mut map = HatMap::new(0, 0);
        map.cell(b"abcdefgh");
        let mut cursor = map.cursor();
        assert!(cursor.next());

        let mut small = [0u8; 4];
        assert_eq!(cursor.key_into(&mut small), 4);
        assert_eq!(&small, b"abcd");

        let mut big = [0u8; 16];
        let n = cursor.key_into(&mut big);
        assert_eq!(&big[..n], b"abcdefgh");
    }

    #[test]
    fn cursor_survives_radix_burst_shapes() {
        let mut map = HatMap::with_config(HatConfig {
            boot_levels: 0,
            bucket_max: 8,
            ..HatConfig::default()
        });
        let mut keys: Vec<String> = (0..200).map(|i| format!("k{i:03}")).collect();
        for key in &keys {
            map.cell(key.as_bytes());
        }
        keys.sort();
        let walked = collect_forward(&map);
        assert_eq!(walked.len(), 200);
        assert_eq!(walked, keys.iter().map(|k| k.as_bytes().to_vec()).collect::<Vec<_>>());

        let mut cursor = map.cursor();
        assert!(cursor.seek(b"k100"));
        assert_eq!(cursor.key(), b"k100");
        assert!(cursor.prev());
        assert_eq!(cursor.key(), b"k099");
    }
}
