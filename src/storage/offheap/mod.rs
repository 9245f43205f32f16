//! Off-Heap Chunk Storage
//!
//! Holds opaque byte values in a memory pool reserved once at startup, outside
//! the regular heap allocator, so that cache size doesn't drive allocator
//! pressure. Values are addressed by an [`EntryRef`] plus the routing hash
//! they were stored under.
//!
//! # Architecture
//!
//! ```text
//! ShardedStore  (hash → segment, abs(hash) % N)
//!   ├─→ ChunkArena(0)  [chunk|chunk|chunk|...]  FreeList: [5, 6, 9, ...]
//!   ├─→ ChunkArena(1)  [chunk|chunk|chunk|...]  FreeList: [0, 3, ...]
//!   └─→ ChunkArena(N-1)
//!
//! put(hash, bytes) → reserve ceil(len / chunk) indices → copy → EntryRef
//! get(hash, ref)   → copy chunks out → re-check validity
//! remove(hash, ref) → invalidate ref → release indices
//! ```
//!
//! Each arena has its own lock, taken only to reserve or release indices.
//! Stores are destroyed explicitly, after every caller has stopped using them.

pub mod arena;
pub mod buffer;
pub mod entry_ref;
pub mod factory;
pub mod free_list;
pub mod production_tests;
pub mod sharded;
pub mod sizing;

pub use arena::{ArenaStats, ChunkArena, GetOutcome};
pub use buffer::ChunkBuffer;
pub use entry_ref::EntryRef;
pub use factory::{create_storage, SharedStorageRegistry, SharedStoreHandle, StorageFactory};
pub use free_list::FreeList;
pub use sharded::{segment_index, ShardedStore, StoreStats};
pub use sizing::{Sizing, SizingPolicy, SizingRequest, MAX_SEGMENT_SIZE_MB};

use crate::error::Result;

/// Hash-routed off-heap value storage
///
/// Callers must pass the same hash to `get` and `remove` that they used for
/// `put`.
pub trait OffHeapStore: Send + Sync {
    /// Store `data` and return its handle
    fn put(&self, hash: i32, data: &[u8]) -> Result<EntryRef>;

    /// Read the value behind `entry`, distinguishing a racing remove from a miss
    fn get_outcome(&self, hash: i32, entry: &EntryRef) -> Result<GetOutcome>;

    /// Read the value behind `entry`; a fresh copy on every call
    fn get(&self, hash: i32, entry: &EntryRef) -> Result<Option<Vec<u8>>> {
        Ok(self.get_outcome(hash, entry)?.into_value())
    }

    /// Invalidate `entry` and free its chunks
    fn remove(&self, hash: i32, entry: &EntryRef) -> Result<()>;

    /// Release the store; repeated calls are harmless
    fn destroy(&self);

    fn stats(&self) -> StoreStats;
}
