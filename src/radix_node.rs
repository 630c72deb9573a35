//! Interior radix nodes: 128 child slots indexed by the low seven bits of
//! the next key byte.
//!
//! A radix node is only ever created by bursting a bucket (or, for
//! residues too long for any array class, by chaining directly).  It is
//! never grown, shrunk or promoted afterward.  Slot zero doubles as the
//! landing point for keys exhausted at this depth, which is why a zero
//! scan digit contributes no byte during key reconstruction.

use crate::arena::{Arena, CLASS_RADIX};
use crate::array_node;
use crate::bucket_node;
use crate::config::HatConfig;
use crate::pail_node;
use crate::slot::{NodeTag, Slot};

/// SAFETY: `radix` must be a live radix node and `idx < 128`
#[inline]
pub(crate) unsafe fn slot_at(radix: *const u8, idx: usize) -> *mut Slot {
    debug_assert!(idx < 128);
    (radix as *mut Slot).add(idx)
}

/// Peels the leading byte off `key` (exhausted keys land on digit zero) and
/// inserts the remainder below `radix`, copying `value` into the claimed
/// aux slot.  Cascades bursts in the subtree as needed.
///
/// SAFETY: `radix` must be a live radix node of this map and `value` must
/// be `cfg.aux` bytes.
pub(crate) unsafe fn add_to_radix(
    arena: &mut Arena,
    cfg: &HatConfig,
    radix: *mut u8,
    key: &[u8],
    value: &[u8],
) {
    let (ch, rest) = match key.split_first() {
        Some((&b, rest)) => ((b & 0x7f) as usize, rest),
        None => (0, key),
    };
    let slot = slot_at(radix, ch);

    loop {
        if (*slot).is_empty() {
            if let Some(cell) = array_node::new_array(arena, cfg, slot, rest) {
                core::ptr::copy_nonoverlapping(value.as_ptr(), cell, cfg.aux);
                return;
            }
            // no array class holds this residue; chain another radix level
            let next = arena.alloc_class(CLASS_RADIX);
            *slot = Slot::new(next, NodeTag::Radix);
            return add_to_radix(arena, cfg, next, rest, value);
        }
        match (*slot).tag() {
            NodeTag::Radix => {
                return add_to_radix(arena, cfg, (*slot).ptr(), rest, value);
            }
            NodeTag::Bucket => {
                if bucket_node::add_to_bucket(arena, cfg, slot, rest, value) {
                    return;
                }
                bucket_node::burst_to_radix(arena, cfg, slot);
            }
            NodeTag::Array => {
                if let Some(cell) = array_node::add_to_array(arena, cfg, slot, rest, true) {
                    core::ptr::copy_nonoverlapping(value.as_ptr(), cell, cfg.aux);
                    return;
                }
                // the failed add may already have burst the node to a pail
                if (*slot).tag() == NodeTag::Array {
                    bucket_node::burst_array_to_bucket(arena, cfg, slot);
                }
            }
            NodeTag::Pail => {
                if let Some(cell) = pail_node::add_to_pail(arena, cfg, slot, rest) {
                    core::ptr::copy_nonoverlapping(value.as_ptr(), cell, cfg.aux);
                    return;
                }
                bucket_node::burst_pail_to_bucket(arena, cfg, slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::CLASS_ARRAY0;
    use crate::array_node::{head, scan};

    #[test]
    fn exhausted_key_lands_on_slot_zero() {
        let cfg = HatConfig::default().normalized();
        let mut arena = Arena::new(&cfg);
        let radix = arena.alloc_class(CLASS_RADIX);

        unsafe {
            add_to_radix(&mut arena, &cfg, radix, b"", &[]);
            add_to_radix(&mut arena, &cfg, radix, b"a", &[]);

            let zero = *slot_at(radix, 0);
            assert_eq!(zero.tag(), NodeTag::Array);
            let cap = arena.class_bytes(CLASS_ARRAY0 + head(zero.ptr()).class as usize);
            assert!(scan(zero.ptr(), cap, 0, b"").is_some());

            let a = *slot_at(radix, b'a' as usize);
            let cap = arena.class_bytes(CLASS_ARRAY0 + head(a.ptr()).class as usize);
            assert!(scan(a.ptr(), cap, 0, b"").is_some());
        }
    }

    #[test]
    fn oversized_residue_chains_radix_levels() {
        let cfg = HatConfig {
            array_classes: vec![16],
            ..HatConfig::default()
        }
        .normalized();
        let mut arena = Arena::new(&cfg);
        let radix = arena.alloc_class(CLASS_RADIX);

        // 16-byte class holds at most 11 residue bytes; force chaining
        let long = [b'x'; 40];
        unsafe { add_to_radix(&mut arena, &cfg, radix, &long, &[]) };
        assert!(arena.live(CLASS_RADIX) > 1);

        let mut slot = unsafe { *slot_at(radix, b'x' as usize) };
        let mut depth = 1;
        while slot.tag() == NodeTag::Radix {
            slot = unsafe { *slot_at(slot.ptr(), b'x' as usize) };
            depth += 1;
        }
        assert_eq!(slot.tag(), NodeTag::Array);
        let cap = arena.class_bytes(CLASS_ARRAY0 + unsafe { head(slot.ptr()) }.class as usize);
        assert!(unsafe { scan(slot.ptr(), cap, 0, &long[depth..]) }.is_some());
    }
}
