//! Allocation handles for stored values

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Handle to the chunks backing one stored value
///
/// The chunk list and length never change after creation. The validity flag
/// goes from `true` to `false` exactly once, when the value is removed, and is
/// read without the arena lock by concurrent readers. Clones share the flag.
#[derive(Clone)]
pub struct EntryRef {
    inner: Arc<RefInner>,
}

struct RefInner {
    chunks: Box<[u32]>,
    len: usize,
    valid: AtomicBool,
}

impl EntryRef {
    pub(crate) fn new(chunks: Vec<u32>, len: usize) -> Self {
        Self::with_state(chunks, len, true)
    }

    /// Handle for a zero-length value; occupies no chunks
    pub fn empty() -> Self {
        Self::with_state(Vec::new(), 0, true)
    }

    /// Handle that was never valid
    pub fn invalid() -> Self {
        Self::with_state(Vec::new(), 0, false)
    }

    fn with_state(chunks: Vec<u32>, len: usize, valid: bool) -> Self {
        Self {
            inner: Arc::new(RefInner {
                chunks: chunks.into_boxed_slice(),
                len,
                valid: AtomicBool::new(valid),
            }),
        }
    }

    /// Chunk indices in value order
    pub fn chunks(&self) -> &[u32] {
        &self.inner.chunks
    }

    pub fn chunk_count(&self) -> usize {
        self.inner.chunks.len()
    }

    /// Length of the stored value in bytes
    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::Acquire)
    }

    /// Clear the validity flag; returns `true` only for the call that cleared it
    pub(crate) fn invalidate(&self) -> bool {
        self.inner
            .valid
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether both handles refer to the same allocation
    pub fn same_allocation(&self, other: &EntryRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryRef")
            .field("chunks", &self.inner.chunks)
            .field("len", &self.inner.len)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EntryRef(len={}, chunks={}, valid={})",
            self.len(),
            self.chunk_count(),
            self.is_valid()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_ref_creation() {
        let entry = EntryRef::new(vec![4, 9], 3000);
        assert_eq!(entry.chunks(), &[4, 9]);
        assert_eq!(entry.chunk_count(), 2);
        assert_eq!(entry.len(), 3000);
        assert!(entry.is_valid());
    }

    #[test]
    fn test_sentinels() {
        let empty = EntryRef::empty();
        assert!(empty.is_empty() && empty.is_valid());
        assert_eq!(empty.chunk_count(), 0);

        let invalid = EntryRef::invalid();
        assert!(!invalid.is_valid());
    }

    #[test]
    fn test_invalidate_once_and_shared_by_clones() {
        let entry = EntryRef::new(vec![1], 10);
        let clone = entry.clone();

        assert!(entry.invalidate());
        assert!(!clone.is_valid());
        assert!(!clone.invalidate());
        assert!(entry.same_allocation(&clone));
        assert!(!entry.same_allocation(&EntryRef::new(vec![1], 10)));
    }
}
