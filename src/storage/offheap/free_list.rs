//! Free chunk tracking for a single arena

use crate::error::{Error, Result};

/// Marks an empty slot in the ring
pub const NULL_INDEX: u32 = u32::MAX;

/// Bounded circular buffer of free chunk indices
///
/// Array-backed with head/tail/size counters so that reserving and releasing
/// never allocates. Not synchronized: the owning arena guards it with its lock.
#[derive(Debug)]
pub struct FreeList {
    slots: Box<[u32]>,
    head: usize,
    tail: usize,
    size: usize,
}

impl FreeList {
    /// Create an empty free list able to hold `capacity` indices
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![NULL_INDEX; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            size: 0,
        }
    }

    /// Create a free list holding every index in `0..chunk_count`
    pub fn fully_populated(chunk_count: u32) -> Self {
        let mut list = Self::with_capacity(chunk_count as usize);
        for index in 0..chunk_count {
            list.push(index);
        }
        list
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size == self.slots.len()
    }

    /// Return an index to the list; `false` when already full
    pub fn offer(&mut self, index: u32) -> bool {
        if self.is_full() {
            return false;
        }
        self.push(index);
        true
    }

    /// Take the index at the head, if any
    pub fn poll(&mut self) -> Option<u32> {
        if self.is_empty() {
            return None;
        }
        let index = std::mem::replace(&mut self.slots[self.head], NULL_INDEX);
        self.head = (self.head + 1) % self.slots.len();
        self.size -= 1;
        Some(index)
    }

    /// Reserve exactly `count` indices, or none at all
    pub fn poll_many(&mut self, count: usize) -> Result<Vec<u32>> {
        if count > self.size {
            return Err(Error::CapacityExhausted {
                segment: 0,
                requested: count,
                available: self.size,
            });
        }
        let mut reserved = Vec::with_capacity(count);
        for _ in 0..count {
            if let Some(index) = self.poll() {
                reserved.push(index);
            }
        }
        Ok(reserved)
    }

    /// Return every index in `indices`, or none when they would not all fit
    pub fn offer_many(&mut self, indices: &[u32]) -> Result<()> {
        let room = self.slots.len() - self.size;
        if indices.len() > room {
            return Err(Error::InternalConsistency(format!(
                "Free list overflow: releasing {} chunks with room for {} (capacity {})",
                indices.len(),
                room,
                self.slots.len()
            )));
        }
        for &index in indices {
            self.push(index);
        }
        Ok(())
    }

    fn push(&mut self, index: u32) {
        self.slots[self.tail] = index;
        self.tail = (self.tail + 1) % self.slots.len();
        self.size += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fully_populated_fifo() {
        let mut list = FreeList::fully_populated(4);
        assert!(list.is_full());
        assert_eq!(list.poll(), Some(0));
        assert_eq!(list.poll(), Some(1));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_offer_rejected_when_full() {
        let mut list = FreeList::fully_populated(2);
        assert!(!list.offer(7));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_poll_empty_and_wraparound() {
        let mut list = FreeList::with_capacity(3);
        assert_eq!(list.poll(), None);

        assert!(list.offer(10));
        assert!(list.offer(11));
        assert_eq!(list.poll(), Some(10));
        assert!(list.offer(12));
        assert!(list.offer(13)); // wraps to slot 0
        assert!(!list.offer(14));

        assert_eq!(list.poll(), Some(11));
        assert_eq!(list.poll(), Some(12));
        assert_eq!(list.poll(), Some(13));
        assert_eq!(list.poll(), None);
    }

    #[test]
    fn test_poll_blanks_slot() {
        let mut list = FreeList::fully_populated(2);
        list.poll();
        assert_eq!(list.slots[0], NULL_INDEX);
    }

    #[test]
    fn test_poll_many_is_all_or_nothing() {
        let mut list = FreeList::fully_populated(5);
        assert_eq!(list.poll_many(3).unwrap(), vec![0, 1, 2]);

        let err = list.poll_many(3).unwrap_err();
        assert!(matches!(
            err,
            Error::CapacityExhausted {
                requested: 3,
                available: 2,
                ..
            }
        ));
        assert_eq!(list.len(), 2);
        assert_eq!(list.poll_many(2).unwrap(), vec![3, 4]);
        assert!(list.is_empty());
    }

    #[test]
    fn test_offer_many_rejects_overflow() {
        let mut list = FreeList::fully_populated(4);
        let taken = list.poll_many(2).unwrap();
        assert!(list.offer_many(&[9, 9, 9]).is_err());
        assert_eq!(list.len(), 2);
        list.offer_many(&taken).unwrap();
        assert!(list.is_full());
    }
}
