//! The sized array node, the leaf container that actually stores keys.
//!
//! An array node is one arena allocation of a fixed size class.  Behind a
//! four byte header, key residues grow forward as length-prefixed byte
//! strings, while the fixed-width aux slots grow backward from the end of
//! the allocation.  The k-th aux slot, counting back from the end, pairs
//! with the k-th residue counting forward from the header:
//!
//! ```text
//! [keys_used: u16][count: u8][class: u8][residue 0][residue 1]...
//!                            ...free gap...[aux 1][aux 0]<- allocation end
//! ```
//!
//! The node is full when the gap cannot absorb the next residue plus one
//! more aux slot, or when the one-byte count would overflow.  A full node
//! is promoted to the next sufficient size class, and when no class
//! suffices it bursts into a pail (or reports overflow to the caller when
//! pails are disabled).

use crate::arena::{Arena, CLASS_ARRAY0};
use crate::config::HatConfig;
use crate::pail_node;
use crate::slot::{NodeTag, Slot};
use crate::utils::{prefix_len, read_prefix, write_prefix};

/// Bytes of header in front of the key region
pub(crate) const ARRAY_HEAD: usize = 4;

/// Most entries one node can carry; the pairing count is a single byte
pub(crate) const ARRAY_MAX_COUNT: usize = 255;

#[repr(C)]
pub(crate) struct ArrayHead {
    /// Bytes of the key region in use
    pub keys_used: u16,
    /// Number of stored residues
    pub count: u8,
    /// Index into the map's array class table
    pub class: u8,
}

/// SAFETY: `node` must be a live array node allocation
#[inline]
pub(crate) unsafe fn head<'a>(node: *const u8) -> &'a ArrayHead {
    &*(node as *const ArrayHead)
}

#[inline]
unsafe fn head_mut<'a>(node: *mut u8) -> &'a mut ArrayHead {
    &mut *(node as *mut ArrayHead)
}

/// Whether one more residue of `n` bytes still fits in a node of `cap` bytes
#[inline]
fn fits(used: usize, count: usize, aux: usize, n: usize, cap: usize) -> bool {
    count < ARRAY_MAX_COUNT && (count + 1) * aux + used + n + prefix_len(n) + ARRAY_HEAD <= cap
}

/// Linear scan for an exact residue match, returning the paired aux slot.
///
/// SAFETY: `node` must be a live array node of `cap` bytes in a map of
/// payload width `aux`.
pub(crate) unsafe fn scan(node: *const u8, cap: usize, aux: usize, residue: &[u8]) -> Option<*mut u8> {
    let h = head(node);
    let keys = node.add(ARRAY_HEAD);
    let used = h.keys_used as usize;
    let mut tst = 0usize;
    let mut cnt = 0usize;
    while tst < used {
        let (len, skip) = read_prefix(keys.add(tst));
        tst += skip;
        if len == residue.len()
            && core::slice::from_raw_parts(keys.add(tst), len) == residue
        {
            return Some(node.add(cap - (cnt + 1) * aux) as *mut u8);
        }
        tst += len;
        cnt += 1;
    }
    None
}

/// Appends a residue and claims its aux slot.  The caller must have checked
/// that the entry fits.
///
/// SAFETY: as for [scan], plus `node` must have room per [fits].
pub(crate) unsafe fn append(node: *mut u8, cap: usize, aux: usize, residue: &[u8]) -> *mut u8 {
    let h = head_mut(node);
    debug_assert!(fits(h.keys_used as usize, h.count as usize, aux, residue.len(), cap));
    let keys = node.add(ARRAY_HEAD);
    let tst = h.keys_used as usize;
    let skip = write_prefix(keys.add(tst), residue.len());
    core::ptr::copy_nonoverlapping(residue.as_ptr(), keys.add(tst + skip), residue.len());
    h.keys_used = (tst + skip + residue.len()) as u16;
    h.count += 1;
    node.add(cap - h.count as usize * aux)
}

/// Creates a fresh array node in `slot` holding one residue, picking the
/// smallest sufficient size class.  Returns `None` when the residue fits no
/// class at all; the slot is left untouched in that case.
pub(crate) fn new_array(
    arena: &mut Arena,
    cfg: &HatConfig,
    slot: *mut Slot,
    residue: &[u8],
) -> Option<*mut u8> {
    let need = ARRAY_HEAD + prefix_len(residue.len()) + residue.len() + cfg.aux;
    let class = (0..cfg.array_classes.len())
        .find(|&c| need <= arena.class_bytes(CLASS_ARRAY0 + c))?;

    let node = arena.alloc_class(CLASS_ARRAY0 + class);
    let cap = arena.class_bytes(CLASS_ARRAY0 + class);
    //SAFETY: node is a fresh zeroed block of `cap` bytes and the chosen
    // class fits the entry
    unsafe {
        head_mut(node).class = class as u8;
        let cell = append(node, cap, cfg.aux, residue);
        *slot = Slot::new(node, NodeTag::Array);
        Some(cell)
    }
}

/// Adds a residue to the array node in `slot`, promoting through the size
/// classes as needed.  Does not look for duplicates; callers scan first.
/// Returns `None` when the node cannot absorb the residue even at the
/// largest class: with `allow_pail` the node has then already burst into a
/// pail that refused the new residue, otherwise the node is untouched and
/// the caller must burst it.
///
/// SAFETY: `slot` must hold a live array node of this map.
pub(crate) unsafe fn add_to_array(
    arena: &mut Arena,
    cfg: &HatConfig,
    slot: *mut Slot,
    residue: &[u8],
    allow_pail: bool,
) -> Option<*mut u8> {
    let node = (*slot).ptr();
    let h = head(node);
    let cap = arena.class_bytes(CLASS_ARRAY0 + h.class as usize);
    if fits(h.keys_used as usize, h.count as usize, cfg.aux, residue.len(), cap) {
        return Some(append(node, cap, cfg.aux, residue));
    }
    promote(arena, cfg, slot, residue, allow_pail)
}

/// Replaces a full node with the smallest larger class that fits, copying
/// the key region verbatim and re-seating the aux block at the new tail so
/// reverse-index pairing is preserved, then appends the new entry.
unsafe fn promote(
    arena: &mut Arena,
    cfg: &HatConfig,
    slot: *mut Slot,
    residue: &[u8],
    allow_pail: bool,
) -> Option<*mut u8> {
    let node = (*slot).ptr();
    let old_class = head(node).class as usize;
    let used = head(node).keys_used as usize;
    let count = head(node).count as usize;

    let n = residue.len();
    let target = if count < ARRAY_MAX_COUNT {
        (old_class..cfg.array_classes.len()).find(|&c| {
            (count + 1) * cfg.aux + used + n + prefix_len(n) + ARRAY_HEAD
                <= arena.class_bytes(CLASS_ARRAY0 + c)
        })
    } else {
        None
    };
    let Some(target) = target else {
        if allow_pail && cfg.pail_slots > 0 {
            return pail_node::burst_array_to_pail(arena, cfg, slot, residue);
        }
        return None;
    };

    let old_cap = arena.class_bytes(CLASS_ARRAY0 + old_class);
    let new_node = arena.alloc_class(CLASS_ARRAY0 + target);
    let new_cap = arena.class_bytes(CLASS_ARRAY0 + target);

    core::ptr::copy_nonoverlapping(node.add(ARRAY_HEAD), new_node.add(ARRAY_HEAD), used);
    if cfg.aux > 0 {
        core::ptr::copy_nonoverlapping(
            node.add(old_cap - count * cfg.aux),
            new_node.add(new_cap - count * cfg.aux),
            count * cfg.aux,
        );
    }
    {
        let h = head_mut(new_node);
        h.keys_used = used as u16;
        h.count = count as u8;
        h.class = target as u8;
    }
    let cell = append(new_node, new_cap, cfg.aux, residue);
    *slot = Slot::new(new_node, NodeTag::Array);
    arena.free_class(node, CLASS_ARRAY0 + old_class);
    arena.events.promotes += 1;
    Some(cell)
}

/// One stored entry, as raw positions inside its node
#[derive(Clone, Copy)]
pub(crate) struct RawEntry {
    /// Start of the length prefix
    pub prefix_ptr: *const u8,
    /// Start of the residue bytes
    pub residue_ptr: *const u8,
    pub len: usize,
    /// Paired aux slot (one past the node when `aux == 0`)
    pub aux_ptr: *const u8,
}

impl RawEntry {
    #[inline]
    pub unsafe fn residue<'a>(&self) -> &'a [u8] {
        core::slice::from_raw_parts(self.residue_ptr, self.len)
    }
}

pub(crate) struct Entries {
    node: *const u8,
    cap: usize,
    aux: usize,
    used: usize,
    tst: usize,
    cnt: usize,
}

/// Walks every (residue, aux) pair of an array node in insertion order.
///
/// SAFETY: the node must stay live and unmodified while the iterator is
/// consumed.
pub(crate) unsafe fn entries(node: *const u8, cap: usize, aux: usize) -> Entries {
    Entries {
        node,
        cap,
        aux,
        used: head(node).keys_used as usize,
        tst: 0,
        cnt: 0,
    }
}

impl Iterator for Entries {
    type Item = RawEntry;

    fn next(&mut self) -> Option<RawEntry> {
        if self.tst >= self.used {
            return None;
        }
        //SAFETY: tst stays inside the key region of a well-formed node
        unsafe {
            let keys = self.node.add(ARRAY_HEAD);
            let prefix_ptr = keys.add(self.tst);
            let (len, skip) = read_prefix(prefix_ptr);
            let residue_ptr = keys.add(self.tst + skip);
            let aux_ptr = self.node.add(self.cap - (self.cnt + 1) * self.aux);
            self.tst += skip + len;
            self.cnt += 1;
            Some(RawEntry {
                prefix_ptr,
                residue_ptr,
                len,
                aux_ptr,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(aux: usize) -> (Arena, HatConfig) {
        let cfg = HatConfig {
            aux,
            ..HatConfig::default()
        }
        .normalized();
        let arena = Arena::new(&cfg);
        (arena, cfg)
    }

    #[test]
    fn single_entry_round_trip() {
        let (mut arena, cfg) = setup(0);
        let mut slot = Slot::EMPTY;
        new_array(&mut arena, &cfg, &mut slot, b"hello").unwrap();
        assert_eq!(slot.tag(), NodeTag::Array);

        let node = slot.ptr();
        let cap = arena.class_bytes(CLASS_ARRAY0 + unsafe { head(node) }.class as usize);
        unsafe {
            assert!(scan(node, cap, 0, b"hello").is_some());
            assert!(scan(node, cap, 0, b"hellp").is_none());
            assert!(scan(node, cap, 0, b"hell").is_none());
            assert!(scan(node, cap, 0, b"").is_none());
        }
    }

    #[test]
    fn empty_residue_is_a_legal_entry() {
        let (mut arena, cfg) = setup(0);
        let mut slot = Slot::EMPTY;
        new_array(&mut arena, &cfg, &mut slot, b"").unwrap();
        let node = slot.ptr();
        let cap = arena.class_bytes(CLASS_ARRAY0);
        unsafe {
            assert_eq!(head(node).count, 1);
            assert_eq!(head(node).keys_used, 1);
            assert!(scan(node, cap, 0, b"").is_some());
            assert!(scan(node, cap, 0, b"x").is_none());
        }
    }

    #[test]
    fn promotion_preserves_pairing() {
        let (mut arena, cfg) = setup(4);
        let mut slot = Slot::EMPTY;
        let keys: Vec<[u8; 3]> = (0u8..30).map(|i| [b'k', i / 10, i % 10]).collect();

        let cell = new_array(&mut arena, &cfg, &mut slot, &keys[0]).unwrap();
        unsafe { core::ptr::copy_nonoverlapping([0u8; 4].as_ptr(), cell, 4) };
        for (i, key) in keys.iter().enumerate().skip(1) {
            let cell = unsafe { add_to_array(&mut arena, &cfg, &mut slot, key, false) }.unwrap();
            unsafe {
                core::ptr::copy_nonoverlapping((i as u32).to_le_bytes().as_ptr(), cell, 4)
            };
        }
        assert!(arena.events.promotes > 0);

        let node = slot.ptr();
        let cap = arena.class_bytes(CLASS_ARRAY0 + unsafe { head(node) }.class as usize);
        for (i, key) in keys.iter().enumerate() {
            let cell = unsafe { scan(node, cap, 4, key) }.unwrap();
            let got = unsafe { core::slice::from_raw_parts(cell, 4) };
            assert_eq!(got, (i as u32).to_le_bytes());
        }
    }

    #[test]
    fn entries_iterate_in_insertion_order() {
        let (mut arena, cfg) = setup(0);
        let mut slot = Slot::EMPTY;
        new_array(&mut arena, &cfg, &mut slot, b"bb").unwrap();
        unsafe {
            add_to_array(&mut arena, &cfg, &mut slot, b"a", false).unwrap();
            add_to_array(&mut arena, &cfg, &mut slot, b"", false).unwrap();
        }
        let node = slot.ptr();
        let cap = arena.class_bytes(CLASS_ARRAY0 + unsafe { head(node) }.class as usize);
        let got: Vec<Vec<u8>> = unsafe { entries(node, cap, 0) }
            .map(|e| unsafe { e.residue() }.to_vec())
            .collect();
        assert_eq!(got, vec![b"bb".to_vec(), b"a".to_vec(), b"".to_vec()]);
    }

    #[test]
    fn overflow_without_pails_reports_none() {
        let (mut arena, mut cfg) = setup(0);
        cfg.array_classes = vec![16];
        let mut slot = Slot::EMPTY;
        new_array(&mut arena, &cfg, &mut slot, b"aaaa").unwrap();
        let refused = unsafe { add_to_array(&mut arena, &cfg, &mut slot, b"bbbbbbbb", false) };
        assert!(refused.is_none());
        assert_eq!(slot.tag(), NodeTag::Array);
    }

    #[test]
    fn long_residue_uses_two_byte_prefix() {
        let (mut arena, cfg) = setup(0);
        let mut slot = Slot::EMPTY;
        let long = vec![0x61u8; 200];
        new_array(&mut arena, &cfg, &mut slot, &long).unwrap();
        let node = slot.ptr();
        let cap = arena.class_bytes(CLASS_ARRAY0 + unsafe { head(node) }.class as usize);
        unsafe {
            assert_eq!(head(node).keys_used as usize, 202);
            assert!(scan(node, cap, 0, &long).is_some());
            assert!(scan(node, cap, 0, &long[..199]).is_none());
        }
    }
}
