//! Hash-routed set of chunk arenas

use super::arena::{ArenaStats, ChunkArena, GetOutcome};
use super::entry_ref::EntryRef;
use super::sizing::Sizing;
use super::OffHeapStore;
use crate::error::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Fixed set of arenas; a hash always routes to the same one
///
/// Holds no lock of its own: each arena serializes itself.
pub struct ShardedStore {
    segments: Vec<ChunkArena>,
    destroyed: AtomicBool,
}

impl ShardedStore {
    /// Create every segment eagerly from a validated sizing
    pub fn new(sizing: &Sizing) -> Result<Self> {
        let segment_size = usize::try_from(sizing.segment_size_bytes()?).map_err(|_| {
            Error::Configuration(format!(
                "segment_size={}MB does not fit in memory",
                sizing.segment_size_mb
            ))
        })?;
        let chunk_size = usize::try_from(sizing.chunk_size_bytes()?).map_err(|_| {
            Error::Configuration(format!(
                "chunk_size={}KB does not fit in memory",
                sizing.chunk_size_kb
            ))
        })?;

        let segments = (0..sizing.segment_count as usize)
            .map(|segment| ChunkArena::new(segment, segment_size, chunk_size))
            .collect::<Result<Vec<_>>>()?;

        info!(
            segments = segments.len(),
            segment_size_mb = sizing.segment_size_mb,
            chunk_size_kb = sizing.chunk_size_kb,
            "Created sharded off-heap store"
        );
        Ok(Self::from_segments(segments))
    }

    pub(crate) fn from_segments(segments: Vec<ChunkArena>) -> Self {
        Self {
            segments,
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Index of the segment owning `hash`
    ///
    /// `i32::MIN` has no positive counterpart and maps to segment 0.
    pub fn segment_for(&self, hash: i32) -> usize {
        segment_index(hash, self.segments.len())
    }

    pub fn segment(&self, index: usize) -> Option<&ChunkArena> {
        self.segments.get(index)
    }

    fn route(&self, hash: i32) -> &ChunkArena {
        &self.segments[self.segment_for(hash)]
    }

    pub fn stats(&self) -> StoreStats {
        let segments: Vec<ArenaStats> = self.segments.iter().map(ChunkArena::stats).collect();
        StoreStats {
            total_chunks: segments.iter().map(|s| s.total_chunks).sum(),
            free_chunks: segments.iter().map(|s| s.free_chunks).sum(),
            used_chunks: segments.iter().map(|s| s.used_chunks).sum(),
            segments,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl OffHeapStore for ShardedStore {
    fn put(&self, hash: i32, data: &[u8]) -> Result<EntryRef> {
        self.route(hash).put(data)
    }

    fn get_outcome(&self, hash: i32, entry: &EntryRef) -> Result<GetOutcome> {
        self.route(hash).get_outcome(entry)
    }

    fn remove(&self, hash: i32, entry: &EntryRef) -> Result<()> {
        self.route(hash).remove(entry)
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        for segment in &self.segments {
            segment.close();
        }
        info!(segments = self.segments.len(), "Destroyed sharded off-heap store");
    }

    fn stats(&self) -> StoreStats {
        ShardedStore::stats(self)
    }
}

/// `abs(hash) % count`, with `i32::MIN` pinned to 0
pub fn segment_index(hash: i32, count: usize) -> usize {
    if hash == i32::MIN {
        return 0;
    }
    hash.unsigned_abs() as usize % count
}

/// Chunk accounting across all segments
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_chunks: usize,
    pub free_chunks: usize,
    pub used_chunks: usize,
    pub segments: Vec<ArenaStats>,
}
