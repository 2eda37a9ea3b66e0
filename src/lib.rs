#![warn(missing_docs)]

//! A concurrent lock-free hash trie with constant-time snapshots.
//!
//! The crate provides a map ([`SnapMap`]) and a set ([`SnapSet`]) that can
//! be read and written from any number of threads in parallel, through
//! shared references and without ever blocking. What sets them apart from
//! other concurrent maps is the snapshot operation: an O(1), linearizable,
//! point-in-time copy of the whole structure, either writable or read-only.
//! Snapshot and source share the tree and unshare lazily, so neither pays
//! for data it does not touch.
//!
//! The underlying data structure is a *Ctrie*, a hash array mapped trie
//! whose internal nodes are updated by compare-and-swap through
//! single-purpose indirection nodes. The snapshot support follows Prokopec,
//! Bronson, Bagwell and Odersky: *Concurrent Tries with Efficient
//! Non-Blocking Snapshots*. Memory is reclaimed through
//! [`crossbeam_epoch`] combined with reference counts on the immutable
//! nodes, so there is no garbage collector and no locking anywhere.
//!
//! # Which type to pick
//!
//! * [`SnapMap`] ‒ a `HashMap`-like interface storing `(K, V)` tuples and
//!   returning clones of the values.
//! * [`SnapSet`] ‒ a set of values.
//! * [`raw::Raw`] ‒ the underlying engine, if you need to build a different
//!   interface on top of it.
//!
//! Because the structure is concurrent, returned values are always clones
//! of the stored data ‒ a reference could outlive the entry it points at.
//! Store `Arc`s if cloning your data is expensive.
//!
//! # Examples
//!
//! ```rust
//! use snaptrie::SnapMap;
//!
//! let map = SnapMap::new();
//! map.insert("hello", 42);
//!
//! // O(1), no matter how large the map is.
//! let snapshot = map.snapshot();
//!
//! map.insert("world", 0);
//! map.remove("hello");
//!
//! assert_eq!(None, map.get("hello"));
//! assert_eq!(Some(42), snapshot.get("hello"));
//! assert_eq!(None, snapshot.get("world"));
//! ```
//!
//! ```rust
//! use snaptrie::SnapMap;
//! use crossbeam_utils::thread;
//!
//! let map = SnapMap::new();
//!
//! thread::scope(|s| {
//!     s.spawn(|_| {
//!         for i in 0..1000 {
//!             map.insert(i, i * 2);
//!         }
//!     });
//!     s.spawn(|_| {
//!         // Entirely safe to iterate while the other thread writes; the
//!         // iterator sees a consistent point in time.
//!         for (k, v) in &map {
//!             assert_eq!(v, k * 2);
//!         }
//!     });
//! }).unwrap();
//! ```

pub mod map;
pub mod raw;
pub mod set;

pub use crate::map::SnapMap;
pub use crate::set::SnapSet;

#[cfg(doctest)]
mod tests;
