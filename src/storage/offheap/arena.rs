//! Chunk arena implementation

use super::buffer::ChunkBuffer;
use super::entry_ref::EntryRef;
use super::free_list::{FreeList, NULL_INDEX};
use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Result of reading through an [`EntryRef`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetOutcome {
    /// The stored bytes, freshly copied
    Hit(Vec<u8>),
    /// Absent or already removed handle
    Miss,
    /// The handle was removed while its bytes were being copied
    Invalid,
}

impl GetOutcome {
    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            GetOutcome::Hit(data) => Some(data),
            GetOutcome::Miss | GetOutcome::Invalid => None,
        }
    }
}

/// One fixed-size memory region split into equal chunks
///
/// Only reserving and releasing chunk indices is serialized, under the free
/// list mutex. Byte copies run outside it against a shared buffer handle; that
/// is sound because reserved chunk ranges never overlap.
///
/// Closing must happen after every caller has stopped issuing requests.
pub struct ChunkArena {
    segment: usize,
    chunk_size: usize,
    chunk_count: u32,
    /// `None` once closed
    free: Mutex<Option<FreeList>>,
    /// `None` once closed
    buffer: RwLock<Option<Arc<ChunkBuffer>>>,
}

impl ChunkArena {
    /// Create an arena of `size` bytes split into `chunk_size` chunks
    pub fn new(segment: usize, size: usize, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 || size < chunk_size || size % chunk_size != 0 {
            return Err(Error::Configuration(format!(
                "Arena size {} must be a non-zero multiple of chunk size {}",
                size, chunk_size
            )));
        }
        let chunk_count = u32::try_from(size / chunk_size)
            .ok()
            .filter(|&count| count < NULL_INDEX)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "Arena size {} with chunk size {} yields too many chunks",
                    size, chunk_size
                ))
            })?;

        let buffer = ChunkBuffer::allocate(size)?;
        info!(
            segment,
            size, chunk_size, chunk_count, "Initialized off-heap chunk arena"
        );

        Ok(Self {
            segment,
            chunk_size,
            chunk_count,
            free: Mutex::new(Some(FreeList::fully_populated(chunk_count))),
            buffer: RwLock::new(Some(Arc::new(buffer))),
        })
    }

    pub fn segment(&self) -> usize {
        self.segment
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// Number of chunks needed to hold `len` bytes
    pub fn chunks_needed(&self, len: usize) -> usize {
        len.div_ceil(self.chunk_size)
    }

    /// Store `data`, returning the handle that addresses it
    pub fn put(&self, data: &[u8]) -> Result<EntryRef> {
        if data.is_empty() {
            self.ensure_open()?;
            return Ok(EntryRef::empty());
        }

        let needed = self.chunks_needed(data.len());
        let (chunks, buffer) = {
            let mut free = self.free.lock();
            let list = free.as_mut().ok_or_else(|| self.closed())?;
            let buffer = self.buffer()?;
            (list.poll_many(needed).map_err(|e| self.exhausted(e))?, buffer)
        };

        for (i, &chunk) in chunks.iter().enumerate() {
            let start = i * self.chunk_size;
            let end = (start + self.chunk_size).min(data.len());
            // Safety: `chunk` was just reserved for this call alone
            unsafe {
                buffer.write_at(chunk as usize * self.chunk_size, &data[start..end]);
            }
        }

        metrics::counter!("offheap_put_total").increment(1);
        debug!(
            segment = self.segment,
            len = data.len(),
            chunks = chunks.len(),
            "Stored value off-heap"
        );
        Ok(EntryRef::new(chunks, data.len()))
    }

    /// Copy out the value behind `entry`
    pub fn get_outcome(&self, entry: &EntryRef) -> Result<GetOutcome> {
        let buffer = self.buffer()?;
        metrics::counter!("offheap_get_total").increment(1);

        if !entry.is_valid() {
            return Ok(GetOutcome::Miss);
        }
        if entry.is_empty() {
            return Ok(GetOutcome::Hit(Vec::new()));
        }
        self.check_layout(entry)?;

        let mut out = vec![0u8; entry.len()];
        for (chunk, dest) in entry.chunks().iter().zip(out.chunks_mut(self.chunk_size)) {
            // Safety: a concurrent remove can recycle the chunk mid-copy; the
            // validity re-check below discards such a read
            unsafe {
                buffer.read_at(*chunk as usize * self.chunk_size, dest);
            }
        }

        fence(Ordering::Acquire);
        if !entry.is_valid() {
            debug!(segment = self.segment, "Value removed during read");
            return Ok(GetOutcome::Invalid);
        }
        Ok(GetOutcome::Hit(out))
    }

    /// Copy out the value behind `entry`; `None` on a miss or racing remove
    pub fn get(&self, entry: &EntryRef) -> Result<Option<Vec<u8>>> {
        Ok(self.get_outcome(entry)?.into_value())
    }

    /// Invalidate `entry` and return its chunks to the free list
    pub fn remove(&self, entry: &EntryRef) -> Result<()> {
        let mut free = self.free.lock();
        let list = free.as_mut().ok_or_else(|| self.closed())?;

        if entry.is_empty() || !entry.is_valid() {
            return Ok(());
        }
        self.check_layout(entry)?;
        if !entry.invalidate() {
            // Lost the race against another remove of the same handle
            return Ok(());
        }

        if let Err(e) = list.offer_many(entry.chunks()) {
            error!(segment = self.segment, error = %e, "Failed to release chunks");
            return Err(e);
        }

        metrics::counter!("offheap_remove_total").increment(1);
        debug!(
            segment = self.segment,
            chunks = entry.chunk_count(),
            "Released off-heap value"
        );
        Ok(())
    }

    /// Drop the buffer and free list; returns `false` if already closed
    ///
    /// Memory is not zeroed. The region is returned to the system allocator
    /// once no in-flight read still holds it.
    pub fn close(&self) -> bool {
        let mut free = self.free.lock();
        if free.take().is_none() {
            return false;
        }
        self.buffer.write().take();
        info!(segment = self.segment, "Closed off-heap chunk arena");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.free.lock().is_none()
    }

    pub fn free_chunks(&self) -> usize {
        self.free.lock().as_ref().map_or(0, FreeList::len)
    }

    pub fn stats(&self) -> ArenaStats {
        let free = self.free.lock();
        let free_chunks = free.as_ref().map_or(0, FreeList::len);
        let total_chunks = self.chunk_count as usize;
        ArenaStats {
            segment: self.segment,
            chunk_size: self.chunk_size,
            total_chunks,
            free_chunks,
            used_chunks: if free.is_some() {
                total_chunks - free_chunks
            } else {
                0
            },
            closed: free.is_none(),
        }
    }

    fn buffer(&self) -> Result<Arc<ChunkBuffer>> {
        self.buffer.read().clone().ok_or_else(|| self.closed())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed());
        }
        Ok(())
    }

    /// Reject handles whose indices cannot belong to this arena
    fn check_layout(&self, entry: &EntryRef) -> Result<()> {
        let fits = entry.chunk_count() == self.chunks_needed(entry.len())
            && entry.chunks().iter().all(|&c| c < self.chunk_count);
        if !fits {
            let e = Error::InternalConsistency(format!(
                "{} does not belong to segment {} ({} chunks of {} bytes)",
                entry, self.segment, self.chunk_count, self.chunk_size
            ));
            error!(segment = self.segment, error = %e, "Rejected foreign entry handle");
            return Err(e);
        }
        Ok(())
    }

    fn closed(&self) -> Error {
        Error::Closed(format!("segment {}", self.segment))
    }

    fn exhausted(&self, e: Error) -> Error {
        match e {
            Error::CapacityExhausted {
                requested,
                available,
                ..
            } => {
                metrics::counter!("offheap_capacity_exhausted_total").increment(1);
                Error::CapacityExhausted {
                    segment: self.segment,
                    requested,
                    available,
                }
            }
            other => other,
        }
    }
}

/// Chunk accounting for one arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArenaStats {
    pub segment: usize,
    pub chunk_size: usize,
    pub total_chunks: usize,
    pub free_chunks: usize,
    pub used_chunks: usize,
    pub closed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: usize = 1024 * 1024;

    fn arena_32mb_2kb() -> ChunkArena {
        ChunkArena::new(0, 32 * MB, 2048).unwrap()
    }

    #[test]
    fn test_arena_rejects_bad_ratios() {
        assert!(matches!(
            ChunkArena::new(0, 1000, 300),
            Err(Error::Configuration(_))
        ));
        assert!(ChunkArena::new(0, 1024, 2048).is_err());
        assert!(ChunkArena::new(0, 1024, 0).is_err());
    }

    #[test]
    fn test_put_get_remove_3072_bytes() -> Result<()> {
        let arena = arena_32mb_2kb();
        assert_eq!(arena.chunk_count(), 16384);

        let value: Vec<u8> = (0..3072).map(|i| (i % 251) as u8).collect();
        let entry = arena.put(&value)?;
        assert_eq!(entry.len(), 3072);
        assert_eq!(entry.chunk_count(), 2);
        assert_eq!(arena.free_chunks(), 16384 - 2);

        assert_eq!(arena.get(&entry)?, Some(value));

        arena.remove(&entry)?;
        assert!(!entry.is_valid());
        assert_eq!(arena.get(&entry)?, None);
        assert_eq!(arena.free_chunks(), 16384);
        Ok(())
    }

    #[test]
    fn test_chunk_spanning() -> Result<()> {
        let arena = ChunkArena::new(0, 64 * 1024, 1024)?;
        assert_eq!(arena.put(&[1u8; 1024])?.chunk_count(), 1);
        assert_eq!(arena.put(&[1u8; 1025])?.chunk_count(), 2);
        assert_eq!(arena.put(&[1u8; 3 * 1024 + 7])?.chunk_count(), 4);
        assert_eq!(arena.put(&[1u8; 1])?.chunk_count(), 1);
        Ok(())
    }

    #[test]
    fn test_empty_value() -> Result<()> {
        let arena = ChunkArena::new(0, 4096, 1024)?;
        let entry = arena.put(&[])?;
        assert!(entry.is_empty());
        assert_eq!(arena.free_chunks(), 4);
        assert_eq!(arena.get(&entry)?, Some(Vec::new()));
        arena.remove(&entry)?;
        assert_eq!(arena.free_chunks(), 4);
        Ok(())
    }

    #[test]
    fn test_overflow_leaves_free_list_untouched() -> Result<()> {
        let arena = ChunkArena::new(3, 4096, 1024)?;
        let _a = arena.put(&[7u8; 3000])?; // 3 chunks
        assert_eq!(arena.free_chunks(), 1);

        let err = arena.put(&[7u8; 2048]).unwrap_err();
        assert!(matches!(
            err,
            Error::CapacityExhausted {
                segment: 3,
                requested: 2,
                available: 1
            }
        ));
        assert!(err.is_retryable());
        assert_eq!(arena.free_chunks(), 1);

        // a single chunk still fits
        arena.put(&[7u8; 10])?;
        assert_eq!(arena.free_chunks(), 0);
        Ok(())
    }

    #[test]
    fn test_removed_ref_misses_after_reuse() -> Result<()> {
        let arena = ChunkArena::new(0, 1024, 1024)?;
        let old = arena.put(b"first value")?;
        arena.remove(&old)?;

        let new = arena.put(b"second value")?;
        assert_eq!(new.chunks(), old.chunks());
        assert_eq!(arena.get_outcome(&old)?, GetOutcome::Miss);
        assert_eq!(arena.get(&new)?, Some(b"second value".to_vec()));
        Ok(())
    }

    #[test]
    fn test_double_remove_releases_once() -> Result<()> {
        let arena = ChunkArena::new(0, 4096, 1024)?;
        let entry = arena.put(&[1u8; 2048])?;
        let clone = entry.clone();
        arena.remove(&entry)?;
        arena.remove(&clone)?;
        arena.remove(&EntryRef::invalid())?;
        assert_eq!(arena.free_chunks(), 4);
        Ok(())
    }

    #[test]
    fn test_foreign_handle_rejected() -> Result<()> {
        let arena = ChunkArena::new(0, 4096, 1024)?;
        let foreign = EntryRef::new(vec![99], 10);
        assert!(matches!(
            arena.remove(&foreign),
            Err(Error::InternalConsistency(_))
        ));
        assert!(foreign.is_valid());
        assert_eq!(arena.free_chunks(), 4);
        Ok(())
    }

    #[test]
    fn test_closed_arena() -> Result<()> {
        let arena = ChunkArena::new(0, 4096, 1024)?;
        let entry = arena.put(b"data")?;

        assert!(arena.close());
        assert!(!arena.close());
        assert!(arena.is_closed());

        assert!(matches!(arena.put(b"x"), Err(Error::Closed(_))));
        assert!(matches!(arena.put(&[]), Err(Error::Closed(_))));
        assert!(matches!(arena.get(&entry), Err(Error::Closed(_))));
        assert!(matches!(arena.remove(&entry), Err(Error::Closed(_))));
        assert!(arena.stats().closed);
        Ok(())
    }

    #[test]
    fn test_stats_conservation() -> Result<()> {
        let arena = ChunkArena::new(1, 8192, 1024)?;
        let a = arena.put(&[0u8; 1500])?;
        let _b = arena.put(&[0u8; 100])?;

        let stats = arena.stats();
        assert_eq!(stats.segment, 1);
        assert_eq!(stats.used_chunks, 3);
        assert_eq!(stats.free_chunks + stats.used_chunks, stats.total_chunks);

        arena.remove(&a)?;
        let stats = arena.stats();
        assert_eq!(stats.used_chunks, 1);
        Ok(())
    }
}
