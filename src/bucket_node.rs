//! The bucket node: the large hash container sitting between the radix
//! skeleton and the leaf arrays.
//!
//! A bucket hashes whole residues over its slots; each slot holds an array
//! or, once an array outgrows the size classes, a pail.  The bucket keeps a
//! live-key counter, and once the counter passes the configured maximum the
//! bucket bursts into a radix node: every residue inside loses its first
//! byte to the new radix level and is reinserted underneath.  Because
//! placement is by hash, the key path cannot be reconstructed from a bucket
//! child; the full residue lives in the leaf.

use crate::arena::{Arena, BUCKET_HEAD, CLASS_ARRAY0, CLASS_BUCKET, CLASS_PAIL, CLASS_RADIX};
use crate::array_node::{self, head};
use crate::config::HatConfig;
use crate::pail_node;
use crate::radix_node;
use crate::slot::{NodeTag, Slot};
use crate::utils::hash_code;

/// SAFETY: `bucket` must be a live bucket node
#[inline]
pub(crate) unsafe fn count_ptr(bucket: *mut u8) -> *mut u32 {
    bucket as *mut u32
}

/// SAFETY: `bucket` must be a live bucket node and `idx < bucket_slots`
#[inline]
pub(crate) unsafe fn slot_at(bucket: *mut u8, idx: usize) -> *mut Slot {
    (bucket.add(BUCKET_HEAD) as *mut Slot).add(idx)
}

#[inline]
pub(crate) fn slot_index(cfg: &HatConfig, residue: &[u8]) -> usize {
    hash_code(residue) as usize % cfg.bucket_slots
}

pub(crate) fn new_bucket(arena: &mut Arena) -> *mut u8 {
    arena.alloc_class(CLASS_BUCKET)
}

/// Adds a residue to the bucket in `slot`, charging the live-key counter,
/// and copies `value` into the claimed aux slot.  Returns `false` when the
/// bucket is over its maximum or the hashed slot cannot absorb the residue;
/// the caller must then burst the bucket.
///
/// SAFETY: `slot` must hold a live bucket node of this map.
pub(crate) unsafe fn add_to_bucket(
    arena: &mut Arena,
    cfg: &HatConfig,
    slot: *mut Slot,
    residue: &[u8],
    value: &[u8],
) -> bool {
    let bucket = (*slot).ptr();
    let count = count_ptr(bucket);
    let prior = *count;
    *count = prior + 1;
    if prior as usize >= cfg.bucket_max {
        return false;
    }

    let inner = slot_at(bucket, slot_index(cfg, residue));
    let cell = if (*inner).is_empty() {
        array_node::new_array(arena, cfg, inner, residue)
    } else if (*inner).tag() == NodeTag::Array {
        array_node::add_to_array(arena, cfg, inner, residue, true)
    } else {
        pail_node::add_to_pail(arena, cfg, inner, residue)
    };
    match cell {
        Some(cell) => {
            core::ptr::copy_nonoverlapping(value.as_ptr(), cell, cfg.aux);
            true
        }
        None => false,
    }
}

/// Bursts a full array node into a fresh bucket, rehashing every entry.
///
/// SAFETY: `slot` must hold a live array node of this map.
pub(crate) unsafe fn burst_array_to_bucket(arena: &mut Arena, cfg: &HatConfig, slot: *mut Slot) {
    let src = (*slot).ptr();
    let src_class = head(src).class as usize;
    let src_cap = arena.class_bytes(CLASS_ARRAY0 + src_class);

    let bucket = new_bucket(arena);
    *slot = Slot::new(bucket, NodeTag::Bucket);
    arena.events.bucket_bursts += 1;

    rehash_into_bucket(arena, cfg, bucket, src, src_cap);
    arena.free_class(src, CLASS_ARRAY0 + src_class);
}

/// Bursts an overflowing pail into a fresh bucket, rehashing the entries of
/// every slot array.
///
/// SAFETY: `slot` must hold a live pail node of this map.
pub(crate) unsafe fn burst_pail_to_bucket(arena: &mut Arena, cfg: &HatConfig, slot: *mut Slot) {
    let pail = (*slot).ptr();
    let bucket = new_bucket(arena);
    *slot = Slot::new(bucket, NodeTag::Bucket);
    arena.events.bucket_bursts += 1;

    for idx in 0..cfg.pail_slots {
        let inner = *pail_node::slot_at(pail, idx);
        if inner.is_empty() {
            continue;
        }
        let node = inner.ptr();
        let cap = arena.class_bytes(CLASS_ARRAY0 + head(node).class as usize);
        rehash_into_bucket(arena, cfg, bucket, node, cap);
        arena.free_class(node, CLASS_ARRAY0 + head(node).class as usize);
    }
    arena.free_class(pail, CLASS_PAIL);
}

unsafe fn rehash_into_bucket(
    arena: &mut Arena,
    cfg: &HatConfig,
    bucket: *mut u8,
    src: *const u8,
    src_cap: usize,
) {
    for e in array_node::entries(src, src_cap, cfg.aux) {
        let r = e.residue();
        let inner = slot_at(bucket, slot_index(cfg, r));
        let cell = if (*inner).is_empty() {
            array_node::new_array(arena, cfg, inner, r)
        } else if (*inner).tag() == NodeTag::Array {
            array_node::add_to_array(arena, cfg, inner, r, true)
        } else {
            pail_node::add_to_pail(arena, cfg, inner, r)
        };
        let cell = cell.expect("bucket redistribution of an entry that already fit");
        core::ptr::copy_nonoverlapping(e.aux_ptr, cell, cfg.aux);
        *count_ptr(bucket) += 1;
    }
}

/// Decomposes a bucket into a radix node: every residue in every array and
/// pail inside gives up its leading byte to index the radix, and the
/// shortened remainder is reinserted underneath, cascading further bursts
/// as needed.
///
/// SAFETY: `slot` must hold a live bucket node of this map.
pub(crate) unsafe fn burst_to_radix(arena: &mut Arena, cfg: &HatConfig, slot: *mut Slot) {
    let bucket = (*slot).ptr();
    if (*count_ptr(bucket) as usize) < cfg.bucket_max {
        arena.events.short_bursts += 1;
    }
    arena.events.radix_bursts += 1;

    let radix = arena.alloc_class(CLASS_RADIX);
    *slot = Slot::new(radix, NodeTag::Radix);

    for idx in 0..cfg.bucket_slots {
        let child = *slot_at(bucket, idx);
        if child.is_empty() {
            continue;
        }
        match child.tag() {
            NodeTag::Array => reinsert_array(arena, cfg, radix, child.ptr()),
            NodeTag::Pail => {
                for j in 0..cfg.pail_slots {
                    let inner = *pail_node::slot_at(child.ptr(), j);
                    if !inner.is_empty() {
                        reinsert_array(arena, cfg, radix, inner.ptr());
                    }
                }
                arena.free_class(child.ptr(), CLASS_PAIL);
            }
            other => debug_assert!(false, "bucket slot held a {other:?} node"),
        }
    }
    arena.free_class(bucket, CLASS_BUCKET);
}

unsafe fn reinsert_array(arena: &mut Arena, cfg: &HatConfig, radix: *mut u8, node: *mut u8) {
    let class = head(node).class as usize;
    let cap = arena.class_bytes(CLASS_ARRAY0 + class);
    for e in array_node::entries(node, cap, cfg.aux) {
        let value = core::slice::from_raw_parts(e.aux_ptr, cfg.aux);
        radix_node::add_to_radix(arena, cfg, radix, e.residue(), value);
    }
    arena.free_class(node, CLASS_ARRAY0 + class);
}
