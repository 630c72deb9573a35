//! # hatmap
//!
//! An ordered in-memory map from byte-string keys to fixed-width payload
//! slots, implemented as a simplified HAT-trie: cascaded radix levels boot
//! the root, hash buckets and pails absorb the fat middle, and packed
//! array nodes keep the leaves in short sequential memory scans instead of
//! pointer chains.  All nodes live in a slab arena with per-size-class
//! recycling, and every child reference is a single tagged word.
//!
//! Keys sort lexicographically by unsigned byte and can be walked in both
//! directions with a [HatCursor], which sorts each leaf container lazily
//! on arrival.
//!
//! ```
//! use hatmap::HatMap;
//!
//! let mut map = HatMap::new(0, 8);
//! map.cell(b"cherry").copy_from_slice(&3u64.to_le_bytes());
//! map.cell(b"apple").copy_from_slice(&1u64.to_le_bytes());
//! map.cell(b"banana").copy_from_slice(&2u64.to_le_bytes());
//!
//! assert_eq!(map.find(b"banana"), Some(&2u64.to_le_bytes()[..]));
//!
//! let mut cursor = map.cursor();
//! let mut keys = Vec::new();
//! while cursor.next() {
//!     keys.push(cursor.key());
//! }
//! assert_eq!(keys, vec![b"apple".to_vec(), b"banana".to_vec(), b"cherry".to_vec()]);
//! ```

pub mod config;
pub mod counters;
pub mod cursor;
pub mod trie;

mod arena;
mod array_node;
mod bucket_node;
mod pail_node;
mod radix_node;
mod slot;
mod utils;

pub use config::HatConfig;
pub use counters::Counters;
pub use cursor::HatCursor;
pub use trie::HatMap;
pub use utils::MAX_KEY_LEN;
