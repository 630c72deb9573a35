//! The pail node: a small hash table whose slots each hold one array node.
//!
//! A pail is born by bursting an array that no size class can hold any
//! longer; the array's residues are rehashed over the pail's slots and each
//! slot grows an ordinary array through the normal promotion path.
//! Collisions are absorbed by letting the slot's array grow; once a slot's
//! array can grow no further the pail itself overflows and the caller
//! bursts it into a bucket.

use crate::arena::{Arena, CLASS_ARRAY0, CLASS_PAIL};
use crate::array_node::{self, head};
use crate::config::HatConfig;
use crate::slot::{NodeTag, Slot};
use crate::utils::hash_code;

/// SAFETY: `pail` must be a live pail node and `idx < pail_slots`
#[inline]
pub(crate) unsafe fn slot_at(pail: *mut u8, idx: usize) -> *mut Slot {
    (pail as *mut Slot).add(idx)
}

#[inline]
pub(crate) fn slot_index(cfg: &HatConfig, residue: &[u8]) -> usize {
    hash_code(residue) as usize % cfg.pail_slots
}

/// Adds a residue to the pail in `slot`.  Returns `None` when the hashed
/// slot's array cannot absorb it at any size class; the caller must then
/// burst the whole pail into a bucket.
///
/// SAFETY: `slot` must hold a live pail node of this map.
pub(crate) unsafe fn add_to_pail(
    arena: &mut Arena,
    cfg: &HatConfig,
    slot: *mut Slot,
    residue: &[u8],
) -> Option<*mut u8> {
    let inner = slot_at((*slot).ptr(), slot_index(cfg, residue));
    if (*inner).is_empty() {
        return array_node::new_array(arena, cfg, inner, residue);
    }
    array_node::add_to_array(arena, cfg, inner, residue, false)
}

/// Bursts a full array node into a fresh pail, redistributing every
/// (residue, aux) pair by hash, then adds the new residue.  The
/// redistribution itself cannot overflow (the source held every entry
/// already), but the new residue still can, in which case `None` comes
/// back and the caller bursts the pail.
///
/// SAFETY: `slot` must hold a live array node of this map.
pub(crate) unsafe fn burst_array_to_pail(
    arena: &mut Arena,
    cfg: &HatConfig,
    slot: *mut Slot,
    residue: &[u8],
) -> Option<*mut u8> {
    let src = (*slot).ptr();
    let src_class = head(src).class as usize;
    let src_cap = arena.class_bytes(CLASS_ARRAY0 + src_class);

    let pail = arena.alloc_class(CLASS_PAIL);
    *slot = Slot::new(pail, NodeTag::Pail);
    arena.events.pail_bursts += 1;

    for e in array_node::entries(src, src_cap, cfg.aux) {
        let r = e.residue();
        let inner = slot_at(pail, slot_index(cfg, r));
        let cell = if (*inner).is_empty() {
            array_node::new_array(arena, cfg, inner, r)
        } else {
            array_node::add_to_array(arena, cfg, inner, r, false)
        };
        let cell = cell.expect("pail redistribution of an entry that already fit");
        core::ptr::copy_nonoverlapping(e.aux_ptr, cell, cfg.aux);
    }
    arena.free_class(src, CLASS_ARRAY0 + src_class);

    add_to_pail(arena, cfg, slot, residue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array_node::{add_to_array, new_array, scan};

    fn setup() -> (Arena, HatConfig) {
        let cfg = HatConfig {
            array_classes: vec![16, 32],
            pail_slots: 7,
            ..HatConfig::default()
        }
        .normalized();
        let arena = Arena::new(&cfg);
        (arena, cfg)
    }

    #[test]
    fn burst_keeps_every_residue_findable() {
        let (mut arena, cfg) = setup();
        let mut slot = Slot::EMPTY;
        let keys: Vec<[u8; 2]> = (0u8..14).map(|i| [b'a' + i, b'x']).collect();

        new_array(&mut arena, &cfg, &mut slot, &keys[0]).unwrap();
        for key in &keys[1..] {
            let cell = unsafe {
                match slot.tag() {
                    NodeTag::Array => add_to_array(&mut arena, &cfg, &mut slot, key, true),
                    NodeTag::Pail => add_to_pail(&mut arena, &cfg, &mut slot, key),
                    _ => unreachable!(),
                }
            };
            assert!(cell.is_some());
        }
        assert_eq!(slot.tag(), NodeTag::Pail);
        assert_eq!(arena.events.pail_bursts, 1);

        for key in &keys {
            let idx = slot_index(&cfg, key);
            let inner = unsafe { *slot_at(slot.ptr(), idx) };
            assert_eq!(inner.tag(), NodeTag::Array);
            let cap = arena.class_bytes(CLASS_ARRAY0 + unsafe { head(inner.ptr()) }.class as usize);
            assert!(unsafe { scan(inner.ptr(), cap, 0, key) }.is_some());
        }
    }
}
