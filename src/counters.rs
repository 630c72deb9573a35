//! Occupancy statistics for a map.
//!
//! ```text
//! let counters = hatmap::Counters::snapshot(&map);
//! counters.print_occupancy();
//! ```
//!
//! The per-class live-node counts come straight from the arena's
//! bookkeeping, so a snapshot is cheap regardless of map size.

use crate::arena::{CLASS_ARRAY0, CLASS_BUCKET, CLASS_PAIL, CLASS_RADIX};
use crate::trie::HatMap;

/// Promote/burst tallies accumulated by the insert engine
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Events {
    /// Array nodes replaced by a larger size class
    pub promotes: usize,
    /// Arrays burst into pails
    pub pail_bursts: usize,
    /// Arrays or pails burst into buckets
    pub bucket_bursts: usize,
    /// Buckets burst into radix nodes
    pub radix_bursts: usize,
    /// Radix bursts of buckets still under their live-key maximum
    pub short_bursts: usize,
}

/// A point-in-time census of one map's node population
#[derive(Clone, Debug)]
pub struct Counters {
    pub radix_nodes: usize,
    pub bucket_nodes: usize,
    pub pail_nodes: usize,
    /// Live array nodes per size class, smallest class first
    pub array_nodes_by_class: Vec<usize>,
    /// Byte size of each array class, parallel to [Self::array_nodes_by_class]
    pub array_class_bytes: Vec<usize>,
    /// Keys stored in the map
    pub live_keys: usize,
    /// Bytes the arena has reserved from the platform allocator
    pub reserved_bytes: usize,
    pub events: Events,
}

impl Counters {
    pub fn snapshot(map: &HatMap) -> Self {
        let arena = &map.arena;
        let classes = arena.class_count() - CLASS_ARRAY0;
        Self {
            radix_nodes: arena.live(CLASS_RADIX),
            bucket_nodes: arena.live(CLASS_BUCKET),
            pail_nodes: arena.live(CLASS_PAIL),
            array_nodes_by_class: (0..classes).map(|c| arena.live(CLASS_ARRAY0 + c)).collect(),
            array_class_bytes: (0..classes).map(|c| arena.class_bytes(CLASS_ARRAY0 + c)).collect(),
            live_keys: map.len(),
            reserved_bytes: arena.reserved_bytes(),
            events: arena.events,
        }
    }

    /// Live array nodes across all size classes
    pub fn array_nodes(&self) -> usize {
        self.array_nodes_by_class.iter().sum()
    }

    pub fn total_nodes(&self) -> usize {
        self.radix_nodes + self.bucket_nodes + self.pail_nodes + self.array_nodes()
    }

    pub fn print_occupancy(&self) {
        println!("keys: {}\tnodes: {}\tarena: {:.2} MB", self.live_keys, self.total_nodes(), self.reserved_bytes as f32 / 1e6);
        println!("radix: {}\tbucket: {}\tpail: {}", self.radix_nodes, self.bucket_nodes, self.pail_nodes);
        println!("class_bytes\tlive_nodes");
        for (bytes, count) in self.array_class_bytes.iter().zip(&self.array_nodes_by_class) {
            println!("{bytes}\t\t{count}");
        }
        println!(
            "promotes: {}\tpail_bursts: {}\tbucket_bursts: {}\tradix_bursts: {} ({} short)",
            self.events.promotes,
            self.events.pail_bursts,
            self.events.bucket_bursts,
            self.events.radix_bursts,
            self.events.short_bursts,
        );
    }
}
