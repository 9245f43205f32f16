//! Concurrent record map

use super::{key_hash, Record, RecordStore};
use crate::error::Result;
use crate::storage::offheap::GetOutcome;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Reads that lose a race with a concurrent replace are retried this many times
pub const MAX_READ_ATTEMPTS: usize = 3;

/// Key → [`Record`] map whose values live where its [`RecordStore`] says
///
/// Each record owns exactly one stored value. Replacing or removing a record
/// frees the old value after the map no longer points at it.
pub struct RecordMap {
    name: String,
    records: DashMap<Vec<u8>, Record>,
    storage: RecordStore,
    next_version: AtomicU64,
}

impl RecordMap {
    pub fn new(name: impl Into<String>, storage: RecordStore) -> Self {
        let name = name.into();
        info!(map = %name, format = ?storage.format(), "Created record map");
        Self {
            name,
            records: DashMap::new(),
            storage,
            next_version: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> &RecordStore {
        &self.storage
    }

    /// Store `value` under `key`, returning the previous value
    ///
    /// On `CapacityExhausted` the previous value stays in place.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        let hash = key_hash(key);
        let stored = self.storage.store(hash, value)?;
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);

        let previous = self
            .records
            .insert(key.to_vec(), Record::new(hash, stored, version));

        match previous {
            Some(old) => self.take(&old),
            None => Ok(None),
        }
    }

    /// Fresh copy of the value stored under `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        for attempt in 1..=MAX_READ_ATTEMPTS {
            let (hash, value) = match self.records.get(key) {
                Some(record) => {
                    record.record_hit();
                    (record.hash(), Record::value(&record).clone())
                }
                None => return Ok(None),
            };

            match self.storage.read(hash, &value)? {
                GetOutcome::Hit(data) => return Ok(Some(data)),
                GetOutcome::Miss | GetOutcome::Invalid => {
                    debug!(map = %self.name, attempt, "Record replaced during read, retrying");
                }
            }
        }

        warn!(
            map = %self.name,
            attempts = MAX_READ_ATTEMPTS,
            "Giving up on a record that kept changing during reads"
        );
        Ok(None)
    }

    /// Remove `key`, returning its value
    pub fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.records.remove(key) {
            Some((_, record)) => self.take(&record),
            None => Ok(None),
        }
    }

    /// Read out a record that already left the map, then free it
    ///
    /// The value is freed even when the read fails; the read error wins.
    fn take(&self, record: &Record) -> Result<Option<Vec<u8>>> {
        let read = self.storage.read(record.hash(), record.value());
        let discarded = self.storage.discard(record.hash(), record.value());
        let value = read?.into_value();
        discarded?;
        Ok(value)
    }

    /// Remove `key` without reading its value; `true` if it was present
    pub fn evict(&self, key: &[u8]) -> Result<bool> {
        match self.records.remove(key) {
            Some((_, record)) => {
                self.storage.discard(record.hash(), record.value())?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of reads served by the record under `key`
    pub fn hits(&self, key: &[u8]) -> Option<u64> {
        self.records.get(key).map(|record| record.hits())
    }

    /// Evict every record
    pub fn clear(&self) -> Result<()> {
        let keys: Vec<Vec<u8>> = self.records.iter().map(|r| r.key().clone()).collect();
        for key in &keys {
            self.evict(key)?;
        }
        debug!(map = %self.name, evicted = keys.len(), "Cleared record map");
        Ok(())
    }

    /// Evict everything, then release the map's storage
    pub fn destroy(&self) -> Result<()> {
        self.clear()?;
        self.storage.destroy();
        info!(map = %self.name, "Destroyed record map");
        Ok(())
    }
}
