//! The map handle and its insert/lookup engine.
//!
//! Descent consumes the key left to right: one 7-bit digit per boot level,
//! one byte per radix level, until a leaf container absorbs the remaining
//! residue.  Inserts run as a state-machine loop over the current child
//! slot plus a remembered bucket parent; any overflow is repaired in place
//! by promoting or bursting the offending node and the loop retries from
//! the same slot (or from the parent after a bucket burst), so a single
//! insert can cascade bursts across several levels.

use core::alloc::Layout;
use core::fmt::{Debug, Formatter};
use core::ptr::NonNull;

use crate::arena::{Arena, ALIGN, CLASS_ARRAY0, CLASS_RADIX};
use crate::array_node;
use crate::bucket_node;
use crate::config::HatConfig;
use crate::cursor::HatCursor;
use crate::pail_node;
use crate::radix_node;
use crate::slot::{NodeTag, Slot};
use crate::utils::MAX_KEY_LEN;

/// An ordered map from byte-string keys to fixed-width payload slots,
/// implemented as a simplified HAT-trie.
///
/// Every key owns a zero-initialized payload region of the width chosen at
/// open time.  [cell](Self::cell) inserts the key if needed and returns the
/// region mutably; [find](Self::find) returns it read-only without ever
/// mutating the map.  A payload width of zero turns the map into a set.
///
/// Keys sort lexicographically by unsigned byte and may be traversed in
/// both directions through a [HatCursor].  Keys are limited to
/// [MAX_KEY_LEN] bytes, and the digit consumed at each boot or radix level
/// is the low seven bits of the key byte, with zero standing in for "key
/// exhausted".  Keys should therefore avoid 0x00 and high-bit bytes in
/// positions the skeleton consumes if exact reconstruction matters.
///
/// ```
/// let mut map = hatmap::HatMap::new(0, 4);
/// map.cell(b"apple").copy_from_slice(&7u32.to_le_bytes());
/// map.cell(b"banana");
///
/// assert_eq!(map.find(b"apple"), Some(&7u32.to_le_bytes()[..]));
/// assert_eq!(map.find(b"cherry"), None);
/// assert_eq!(map.len(), 2);
/// ```
pub struct HatMap {
    pub(crate) cfg: HatConfig,
    pub(crate) arena: Arena,
    /// The boot root: `128^boot_levels` child slots in one dedicated
    /// allocation
    root: NonNull<Slot>,
    root_layout: Layout,
    len: usize,
}

impl HatMap {
    /// Opens an empty map with `boot_levels` cascaded root levels and
    /// `aux` payload bytes per key
    pub fn new(boot_levels: usize, aux: usize) -> Self {
        Self::with_config(HatConfig::new(boot_levels, aux))
    }

    /// Opens an empty map with explicit tuning
    pub fn with_config(cfg: HatConfig) -> Self {
        let cfg = cfg.normalized();
        let mut arena = Arena::new(&cfg);

        let slots = cfg.root_slots();
        let root_layout = Layout::from_size_align(slots * core::mem::size_of::<Slot>(), ALIGN)
            .expect("root layout");
        //SAFETY: root_layout has nonzero size
        let raw = unsafe { std::alloc::alloc_zeroed(root_layout) };
        let Some(root) = NonNull::new(raw as *mut Slot) else {
            std::alloc::handle_alloc_error(root_layout)
        };

        if cfg.boot_levels == 0 {
            // a single root slot boots as an empty bucket
            let bucket = bucket_node::new_bucket(&mut arena);
            //SAFETY: the root allocation holds exactly one zeroed slot
            unsafe { *root.as_ptr() = Slot::new(bucket, NodeTag::Bucket) };
        }

        Self {
            cfg,
            arena,
            root,
            root_layout,
            len: 0,
        }
    }

    /// Number of distinct keys stored
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The tuning this map was opened with
    #[inline]
    pub fn config(&self) -> &HatConfig {
        &self.cfg
    }

    #[inline]
    pub(crate) fn root_base(&self) -> *const Slot {
        self.root.as_ptr()
    }

    #[inline]
    fn root_slot(&self, idx: usize) -> *mut Slot {
        debug_assert!(idx < self.cfg.root_slots());
        //SAFETY: the root allocation spans root_slots() slots
        unsafe { self.root.as_ptr().add(idx) }
    }

    /// Folds the low seven bits of the first `boot_levels` key bytes into
    /// the root index, missing bytes contributing zero.  Returns the index
    /// and the number of key bytes consumed.
    pub(crate) fn boot_index(&self, key: &[u8]) -> (usize, usize) {
        let mut idx = 0;
        let mut off = 0;
        for _ in 0..self.cfg.boot_levels {
            idx *= 128;
            if off < key.len() {
                idx += (key[off] & 0x7f) as usize;
                off += 1;
            }
        }
        (idx, off)
    }

    #[inline]
    fn aux_slice<'s>(&'s self, cell: *const u8) -> &'s [u8] {
        //SAFETY: cell points at `aux` live bytes inside this map's arena
        unsafe { core::slice::from_raw_parts(cell, self.cfg.aux) }
    }

    #[inline]
    fn aux_slice_mut<'s>(&'s mut self, cell: *mut u8) -> &'s mut [u8] {
        if self.cfg.aux == 0 {
            return &mut [];
        }
        //SAFETY: cell points at `aux` live bytes inside this map's arena,
        // exclusively reachable through &mut self
        unsafe { core::slice::from_raw_parts_mut(cell, self.cfg.aux) }
    }

    /// Returns the payload region for `key`, inserting the key if absent.
    /// A repeat insert returns the previously claimed region.
    pub fn cell(&mut self, key: &[u8]) -> &mut [u8] {
        debug_assert!(key.len() <= MAX_KEY_LEN);
        let (boot, mut off) = self.boot_index(key);

        //SAFETY: slot pointers stay inside live nodes of this map; every
        // burst updates the slot it was handed before the loop retries
        unsafe {
            let mut slot: *mut Slot = self.root_slot(boot);
            let mut parent: Option<*mut Slot> = None;

            loop {
                let cur = *slot;
                if cur.is_empty() {
                    if let Some(pslot) = parent {
                        let count = bucket_node::count_ptr((*pslot).ptr());
                        let prior = *count;
                        *count = prior + 1;
                        if (prior as usize) < self.cfg.bucket_max {
                            if let Some(cell) =
                                array_node::new_array(&mut self.arena, &self.cfg, slot, &key[off..])
                            {
                                self.len += 1;
                                return self.aux_slice_mut(cell);
                            }
                        }
                        bucket_node::burst_to_radix(&mut self.arena, &self.cfg, pslot);
                        slot = pslot;
                        parent = None;
                        continue;
                    }
                    if let Some(cell) =
                        array_node::new_array(&mut self.arena, &self.cfg, slot, &key[off..])
                    {
                        self.len += 1;
                        return self.aux_slice_mut(cell);
                    }
                    // residue beyond every array class: chain a radix level
                    // so the next pass peels a byte
                    let radix = self.arena.alloc_class(CLASS_RADIX);
                    *slot = Slot::new(radix, NodeTag::Radix);
                    continue;
                }

                match cur.tag() {
                    NodeTag::Radix => {
                        let ch = if off < key.len() {
                            let c = key[off] & 0x7f;
                            off += 1;
                            c as usize
                        } else {
                            0
                        };
                        slot = radix_node::slot_at(cur.ptr(), ch);
                    }
                    NodeTag::Bucket => {
                        let code = bucket_node::slot_index(&self.cfg, &key[off..]);
                        parent = Some(slot);
                        slot = bucket_node::slot_at(cur.ptr(), code);
                    }
                    NodeTag::Array => {
                        let node = cur.ptr();
                        let cap = self
                            .arena
                            .class_bytes(CLASS_ARRAY0 + array_node::head(node).class as usize);
                        if let Some(cell) = array_node::scan(node, cap, self.cfg.aux, &key[off..]) {
                            return self.aux_slice_mut(cell);
                        }
                        if let Some(pslot) = parent {
                            let count = bucket_node::count_ptr((*pslot).ptr());
                            let prior = *count;
                            *count = prior + 1;
                            if (prior as usize) < self.cfg.bucket_max {
                                if let Some(cell) = array_node::add_to_array(
                                    &mut self.arena,
                                    &self.cfg,
                                    slot,
                                    &key[off..],
                                    true,
                                ) {
                                    self.len += 1;
                                    return self.aux_slice_mut(cell);
                                }
                            }
                            bucket_node::burst_to_radix(&mut self.arena, &self.cfg, pslot);
                            slot = pslot;
                            parent = None;
                            continue;
                        }
                        if let Some(cell) = array_node::add_to_array(
                            &mut self.arena,
                            &self.cfg,
                            slot,
                            &key[off..],
                            true,
                        ) {
                            self.len += 1;
                            return self.aux_slice_mut(cell);
                        }
                        // the failed add may already have burst the node to
                        // a pail; otherwise burst it to a bucket here
                        if (*slot).tag() == NodeTag::Array {
                            bucket_node::burst_array_to_bucket(&mut self.arena, &self.cfg, slot);
                        }
                    }
                    NodeTag::Pail => {
                        let code = pail_node::slot_index(&self.cfg, &key[off..]);
                        let inner = *pail_node::slot_at(cur.ptr(), code);
                        if !inner.is_empty() {
                            let node = inner.ptr();
                            let cap = self
                                .arena
                                .class_bytes(CLASS_ARRAY0 + array_node::head(node).class as usize);
                            if let Some(cell) =
                                array_node::scan(node, cap, self.cfg.aux, &key[off..])
                            {
                                return self.aux_slice_mut(cell);
                            }
                        }
                        if let Some(pslot) = parent {
                            let count = bucket_node::count_ptr((*pslot).ptr());
                            let prior = *count;
                            *count = prior + 1;
                            if (prior as usize) < self.cfg.bucket_max {
                                if let Some(cell) = pail_node::add_to_pail(
                                    &mut self.arena,
                                    &self.cfg,
                                    slot,
                                    &key[off..],
                                ) {
                                    self.len += 1;
                                    return self.aux_slice_mut(cell);
                                }
                            }
                            bucket_node::burst_to_radix(&mut self.arena, &self.cfg, pslot);
                            slot = pslot;
                            parent = None;
                            continue;
                        }
                        if let Some(cell) =
                            pail_node::add_to_pail(&mut self.arena, &self.cfg, slot, &key[off..])
                        {
                            self.len += 1;
                            return self.aux_slice_mut(cell);
                        }
                        bucket_node::burst_pail_to_bucket(&mut self.arena, &self.cfg, slot);
                    }
                }
            }
        }
    }

    /// Looks up `key` and returns its payload region, or `None` if the key
    /// was never inserted.  Never mutates the map; when the payload width
    /// is zero an empty slice stands in for "present".
    pub fn find(&self, key: &[u8]) -> Option<&[u8]> {
        debug_assert!(key.len() <= MAX_KEY_LEN);
        let (boot, mut off) = self.boot_index(key);

        //SAFETY: the walk only reads live nodes reachable from the root
        unsafe {
            let mut next = *self.root_slot(boot);
            loop {
                if next.is_empty() {
                    return None;
                }
                match next.tag() {
                    NodeTag::Radix => {
                        let ch = if off < key.len() {
                            let c = key[off] & 0x7f;
                            off += 1;
                            c as usize
                        } else {
                            0
                        };
                        next = *radix_node::slot_at(next.ptr(), ch);
                    }
                    NodeTag::Bucket => {
                        let code = bucket_node::slot_index(&self.cfg, &key[off..]);
                        next = *bucket_node::slot_at(next.ptr(), code);
                    }
                    NodeTag::Pail => {
                        let code = pail_node::slot_index(&self.cfg, &key[off..]);
                        next = *pail_node::slot_at(next.ptr(), code);
                    }
                    NodeTag::Array => {
                        let node = next.ptr();
                        let cap = self
                            .arena
                            .class_bytes(CLASS_ARRAY0 + array_node::head(node).class as usize);
                        return array_node::scan(node, cap, self.cfg.aux, &key[off..])
                            .map(|cell| self.aux_slice(cell));
                    }
                }
            }
        }
    }

    /// Whether `key` has been inserted
    pub fn contains(&self, key: &[u8]) -> bool {
        self.find(key).is_some()
    }

    /// Allocates a zeroed block inside the map's arena for caller use.
    /// Blocks cannot be freed individually; they live until the map drops.
    pub fn data(&mut self, len: usize) -> &mut [u8] {
        if len == 0 {
            return &mut [];
        }
        let p = self.arena.alloc_data(len);
        //SAFETY: alloc_data returned `len` zeroed bytes exclusive to us
        unsafe { core::slice::from_raw_parts_mut(p, len) }
    }

    /// Opens a cursor positioned before the first key.  The map cannot be
    /// mutated while any cursor is live.
    pub fn cursor(&self) -> HatCursor<'_> {
        HatCursor::new(self)
    }
}

impl Drop for HatMap {
    fn drop(&mut self) {
        //SAFETY: root was allocated with exactly this layout; the arena
        // frees the node slabs itself
        unsafe { std::alloc::dealloc(self.root.as_ptr() as *mut u8, self.root_layout) };
    }
}

impl Debug for HatMap {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "HatMap (keys: {}, boot: {}, aux: {}, arena: {} bytes)",
            self.len,
            self.cfg.boot_levels,
            self.cfg.aux,
            self.arena.reserved_bytes()
        )
    }
}
