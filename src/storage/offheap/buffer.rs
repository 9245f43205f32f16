//! Native memory region backing one arena

use crate::error::{Error, Result};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

const PAGE_SIZE: usize = 4096;

/// A fixed-size, page-aligned block of memory outside any managed collection
///
/// Reads and writes go through raw pointers so that disjoint chunk ranges can
/// be copied from several threads at once without a lock.
pub struct ChunkBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// Safety: the buffer is plain memory; callers coordinate access to chunk ranges
unsafe impl Send for ChunkBuffer {}
unsafe impl Sync for ChunkBuffer {}

impl ChunkBuffer {
    /// Reserve `size` bytes
    pub fn allocate(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::Configuration(
                "Cannot allocate an empty chunk buffer".to_string(),
            ));
        }
        let layout = Layout::from_size_align(size, PAGE_SIZE).map_err(|e| {
            Error::Configuration(format!("Invalid buffer layout for {} bytes: {}", size, e))
        })?;

        // Safety: layout has non-zero size
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            Error::Configuration(format!("Failed to allocate {} bytes off-heap", size))
        })?;

        Ok(Self { ptr, layout })
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// Copy `data` into the buffer at `offset`
    ///
    /// # Safety
    /// The caller must own `offset..offset + data.len()` exclusively for the
    /// duration of the call.
    pub unsafe fn write_at(&self, offset: usize, data: &[u8]) {
        debug_assert!(offset + data.len() <= self.len());
        std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
    }

    /// Copy `out.len()` bytes starting at `offset` into `out`
    ///
    /// # Safety
    /// No writer may own `offset..offset + out.len()` for the duration of the
    /// call, unless the caller discards `out` afterwards.
    pub unsafe fn read_at(&self, offset: usize, out: &mut [u8]) {
        debug_assert!(offset + out.len() <= self.len());
        std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), out.as_mut_ptr(), out.len());
    }
}

impl Drop for ChunkBuffer {
    fn drop(&mut self) {
        // Safety: allocated in `allocate` with this exact layout
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}
