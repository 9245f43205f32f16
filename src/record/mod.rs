//! Cache records backed by on-heap bytes or off-heap handles
//!
//! Whether values live on the heap or in the chunk store is decided once per
//! map through [`RecordStore`], never per record.

pub mod map;

pub use map::RecordMap;

use crate::config::InMemoryFormat;
use crate::error::{Error, Result};
use crate::storage::offheap::{EntryRef, GetOutcome, OffHeapStore};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A record's stored value
#[derive(Debug, Clone)]
pub enum RecordValue {
    OnHeap(Arc<[u8]>),
    OffHeap(EntryRef),
}

impl RecordValue {
    /// Length of the stored value in bytes
    pub fn len(&self) -> usize {
        match self {
            RecordValue::OnHeap(bytes) => bytes.len(),
            RecordValue::OffHeap(entry) => entry.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One cache entry
#[derive(Debug)]
pub struct Record {
    hash: i32,
    value: RecordValue,
    version: u64,
    created_at: Instant,
    hits: AtomicU64,
}

impl Record {
    pub fn new(hash: i32, value: RecordValue, version: u64) -> Self {
        Self {
            hash,
            value,
            version,
            created_at: Instant::now(),
            hits: AtomicU64::new(0),
        }
    }

    pub fn hash(&self) -> i32 {
        self.hash
    }

    pub fn value(&self) -> &RecordValue {
        &self.value
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }
}

/// Where a map keeps its record values
#[derive(Clone)]
pub enum RecordStore {
    OnHeap,
    OffHeap(Arc<dyn OffHeapStore>),
}

impl RecordStore {
    /// Pick the storage for `format`; off-heap maps need a store
    pub fn for_format(
        format: InMemoryFormat,
        store: Option<Arc<dyn OffHeapStore>>,
    ) -> Result<Self> {
        match (format, store) {
            (InMemoryFormat::Binary, _) => Ok(RecordStore::OnHeap),
            (InMemoryFormat::OffHeap, Some(store)) => Ok(RecordStore::OffHeap(store)),
            (InMemoryFormat::OffHeap, None) => Err(Error::Configuration(
                "in_memory_format=off_heap requires an enabled off-heap store".to_string(),
            )),
        }
    }

    pub fn format(&self) -> InMemoryFormat {
        match self {
            RecordStore::OnHeap => InMemoryFormat::Binary,
            RecordStore::OffHeap(_) => InMemoryFormat::OffHeap,
        }
    }

    /// Store `data` for a record routed by `hash`
    pub fn store(&self, hash: i32, data: &[u8]) -> Result<RecordValue> {
        match self {
            RecordStore::OnHeap => Ok(RecordValue::OnHeap(Arc::from(data))),
            RecordStore::OffHeap(store) => Ok(RecordValue::OffHeap(store.put(hash, data)?)),
        }
    }

    /// Read a fresh copy of `value`
    pub fn read(&self, hash: i32, value: &RecordValue) -> Result<GetOutcome> {
        match (self, value) {
            (_, RecordValue::OnHeap(bytes)) => Ok(GetOutcome::Hit(bytes.to_vec())),
            (RecordStore::OffHeap(store), RecordValue::OffHeap(entry)) => {
                store.get_outcome(hash, entry)
            }
            (RecordStore::OnHeap, RecordValue::OffHeap(_)) => Err(Error::InternalConsistency(
                "Off-heap record value in an on-heap map".to_string(),
            )),
        }
    }

    /// Free whatever `value` occupies
    pub fn discard(&self, hash: i32, value: &RecordValue) -> Result<()> {
        match (self, value) {
            (RecordStore::OffHeap(store), RecordValue::OffHeap(entry)) => {
                store.remove(hash, entry)
            }
            _ => Ok(()),
        }
    }

    pub fn destroy(&self) {
        if let RecordStore::OffHeap(store) = self {
            store.destroy();
        }
    }
}

/// Routing hash for a record key
pub fn key_hash(key: &[u8]) -> i32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish() as i32
}
