//! Slab allocator backing every node in a map.
//!
//! Memory is reserved in fixed slabs and handed out by bumping a cursor;
//! nothing is ever returned to the platform allocator until the map is
//! dropped, at which point the slab chain is released wholesale.  Freed
//! nodes are instead threaded onto a per-size-class free list through their
//! first word, and allocation prefers the free list, zero-filling recycled
//! blocks before reuse.
//!
//! Every class size is rounded up to 8 bytes and slabs are 8-aligned, so
//! the low three bits of any node address are free for the slot tag.
//!
//! Out of memory is fatal: allocation failure goes to
//! [std::alloc::handle_alloc_error] and never returns.

use core::alloc::Layout;
use core::ptr::NonNull;

use crate::config::HatConfig;
use crate::counters::Events;
use crate::slot::Slot;

/// Allocation granularity; keeps the slot tag bits clear
pub(crate) const ALIGN: usize = 8;

/// Default slab size.  A slab may be larger when a single request (a wide
/// bucket, a large `data` block) exceeds it.
const SLAB_BYTES: usize = 64 * 1024;

/// Size-class indices.  Array classes follow the fixed node shapes.
pub(crate) const CLASS_RADIX: usize = 0;
pub(crate) const CLASS_BUCKET: usize = 1;
pub(crate) const CLASS_PAIL: usize = 2;
pub(crate) const CLASS_ARRAY0: usize = 3;

/// Bytes in front of a bucket's slot array holding its live-key counter
pub(crate) const BUCKET_HEAD: usize = 8;

#[inline]
fn round_up(n: usize) -> usize {
    (n + (ALIGN - 1)) & !(ALIGN - 1)
}

pub(crate) struct Arena {
    /// Allocation size per class index, rounded up to [ALIGN]
    class_size: Vec<usize>,
    /// Free-list head per class; the first word of a freed block holds the
    /// next-free pointer
    free: Vec<*mut u8>,
    /// Live allocations per class
    counts: Vec<usize>,
    slabs: Vec<(NonNull<u8>, Layout)>,
    /// Bump offset into the newest slab
    cursor: usize,
    /// Capacity of the newest slab
    cap: usize,
    /// Total bytes reserved from the platform allocator
    reserved: usize,
    /// Promote/burst tallies, shared engine context
    pub(crate) events: Events,
}

impl Arena {
    pub fn new(cfg: &HatConfig) -> Self {
        let word = core::mem::size_of::<Slot>();
        let mut class_size = vec![
            round_up(128 * word),
            round_up(BUCKET_HEAD + cfg.bucket_slots * word),
            round_up(cfg.pail_slots * word),
        ];
        class_size.extend(cfg.array_classes.iter().map(|&c| round_up(c as usize)));
        let classes = class_size.len();
        Self {
            class_size,
            free: vec![core::ptr::null_mut(); classes],
            counts: vec![0; classes],
            slabs: Vec::new(),
            cursor: 0,
            cap: 0,
            reserved: 0,
            events: Events::default(),
        }
    }

    /// Allocated bytes for a class, after rounding
    #[inline]
    pub fn class_bytes(&self, class: usize) -> usize {
        self.class_size[class]
    }

    /// Live allocations of a class
    #[inline]
    pub fn live(&self, class: usize) -> usize {
        self.counts[class]
    }

    #[inline]
    pub fn class_count(&self) -> usize {
        self.class_size.len()
    }

    /// Total bytes reserved from the platform allocator
    #[inline]
    pub fn reserved_bytes(&self) -> usize {
        self.reserved
    }

    /// Returns a zeroed block of the class size, recycled when possible
    pub fn alloc_class(&mut self, class: usize) -> *mut u8 {
        let size = self.class_size[class];
        debug_assert!(size > 0);
        self.counts[class] += 1;

        let head = self.free[class];
        if !head.is_null() {
            //SAFETY: blocks on the free list were allocated at this class
            // size and carry the next-free pointer in their first word
            unsafe {
                self.free[class] = *(head as *const *mut u8);
                core::ptr::write_bytes(head, 0, size);
            }
            return head;
        }
        self.bump(size)
    }

    /// Returns a zeroed block of `len` bytes for external use.  Data blocks
    /// are never recycled; they live until the map is dropped.
    pub fn alloc_data(&mut self, len: usize) -> *mut u8 {
        self.bump(round_up(len))
    }

    /// Recycles a node block onto its class free list
    pub fn free_class(&mut self, ptr: *mut u8, class: usize) {
        debug_assert!(self.counts[class] > 0);
        self.counts[class] -= 1;
        //SAFETY: ptr came from alloc_class at this class size, which is at
        // least one word
        unsafe {
            *(ptr as *mut *mut u8) = self.free[class];
        }
        self.free[class] = ptr;
    }

    fn bump(&mut self, size: usize) -> *mut u8 {
        if self.cursor + size > self.cap {
            self.grow(size);
        }
        //SAFETY: grow guarantees the newest slab has room for `size` past
        // the cursor, and slabs are zero-initialized
        let p = unsafe { self.slabs.last().unwrap().0.as_ptr().add(self.cursor) };
        self.cursor += size;
        p
    }

    fn grow(&mut self, size: usize) {
        let bytes = size.max(SLAB_BYTES);
        let layout = Layout::from_size_align(bytes, ALIGN).expect("slab layout");
        //SAFETY: layout has nonzero size
        let raw = unsafe { std::alloc::alloc_zeroed(layout) };
        let Some(slab) = NonNull::new(raw) else {
            std::alloc::handle_alloc_error(layout)
        };
        self.slabs.push((slab, layout));
        self.cursor = 0;
        self.cap = bytes;
        self.reserved += bytes;
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // Free lists live inside the slabs, so releasing the slab chain
        // releases everything.
        for (slab, layout) in self.slabs.drain(..) {
            //SAFETY: each slab was allocated with exactly this layout
            unsafe { std::alloc::dealloc(slab.as_ptr(), layout) };
        }
    }
}
