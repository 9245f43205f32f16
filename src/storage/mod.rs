//! Storage layer
//!
//! # Architecture
//!
//! ```text
//! RecordMap (key → Record)
//!   └─→ RecordStore (OnHeap | OffHeap)
//!        └─→ OffHeapStore (exclusive ShardedStore or shared handle)
//!             └─→ ChunkArena × N
//! ```
//!
//! The off-heap engine knows nothing about keys: it stores opaque byte values
//! and hands back an [`offheap::EntryRef`] that the record layer keeps.

pub mod offheap;

pub use offheap::{EntryRef, OffHeapStore, ShardedStore, StorageFactory};
