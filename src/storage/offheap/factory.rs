//! Store construction from configuration
//!
//! Two policies share the same sizing and store:
//!
//! - **Exclusive**: every owner gets its own [`ShardedStore`], destroyed with it.
//! - **Shared**: one store per [`SharedStorageRegistry`], created on first
//!   acquire and torn down when the last handle is destroyed.

use super::arena::GetOutcome;
use super::entry_ref::EntryRef;
use super::sharded::{ShardedStore, StoreStats};
use super::sizing::{Sizing, SizingPolicy, SizingRequest};
use super::OffHeapStore;
use crate::config::{resolve_ceiling, MemoryCeiling, OffHeapConfig, ProcessMemoryCeiling};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Builds stores from [`OffHeapConfig`]
pub struct StorageFactory {
    ceiling: Box<dyn MemoryCeiling>,
    registry: Arc<SharedStorageRegistry>,
}

impl StorageFactory {
    pub fn new(ceiling: Box<dyn MemoryCeiling>, registry: Arc<SharedStorageRegistry>) -> Self {
        Self { ceiling, registry }
    }

    pub fn registry(&self) -> &Arc<SharedStorageRegistry> {
        &self.registry
    }

    /// Validate the configuration and derive the storage layout
    pub fn sizing(&self, config: &OffHeapConfig) -> Result<Sizing> {
        let total = config.total_size()?;
        let chunk = config.chunk_size()?;
        SizingPolicy::compute(SizingRequest {
            total_size_mb: total.megabytes(),
            segment_count: config.segment_count,
            chunk_size_kb: chunk.kilobytes(),
            memory_ceiling_bytes: resolve_ceiling(self.ceiling.as_ref()),
        })
    }

    /// Create an exclusive or shared store, as configured
    pub fn create(&self, config: &OffHeapConfig) -> Result<Arc<dyn OffHeapStore>> {
        if !config.enabled {
            return Err(Error::Configuration(
                "Off-heap storage is disabled (enabled=false)".to_string(),
            ));
        }
        let sizing = self.sizing(config)?;

        if config.shared {
            Ok(Arc::new(self.registry.acquire(&sizing)?))
        } else {
            info!(total_size_mb = sizing.total_size_mb, "Creating exclusive off-heap store");
            Ok(Arc::new(ShardedStore::new(&sizing)?))
        }
    }
}

/// Create a store using the process memory ceiling
pub fn create_storage(
    config: &OffHeapConfig,
    registry: &Arc<SharedStorageRegistry>,
) -> Result<Arc<dyn OffHeapStore>> {
    let ceiling = ProcessMemoryCeiling::from_config(config)?;
    StorageFactory::new(Box::new(ceiling), Arc::clone(registry)).create(config)
}

/// Owner of the process-wide shared store
///
/// The host creates one registry, hands it to every factory, and calls
/// [`SharedStorageRegistry::shutdown`] when it stops.
#[derive(Default)]
pub struct SharedStorageRegistry {
    state: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    store: Option<Arc<ShardedStore>>,
    sizing: Option<Sizing>,
    refs: usize,
}

impl SharedStorageRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take a reference to the shared store, creating it on first use
    pub fn acquire(self: &Arc<Self>, sizing: &Sizing) -> Result<SharedStoreHandle> {
        let mut state = self.state.lock();
        let store = match &state.store {
            Some(store) => {
                if let Some(existing) = state.sizing.filter(|existing| existing != sizing) {
                    warn!(
                        requested = ?sizing,
                        existing = ?existing,
                        "Shared store already exists, ignoring requested sizing"
                    );
                }
                Arc::clone(store)
            }
            None => {
                info!(total_size_mb = sizing.total_size_mb, "Creating shared off-heap store");
                let store = Arc::new(ShardedStore::new(sizing)?);
                state.store = Some(Arc::clone(&store));
                state.sizing = Some(*sizing);
                store
            }
        };
        state.refs += 1;

        Ok(SharedStoreHandle {
            store,
            registry: Arc::clone(self),
            released: AtomicBool::new(false),
        })
    }

    fn release(&self, store: &Arc<ShardedStore>) -> Result<()> {
        let mut state = self.state.lock();
        let current = match &state.store {
            Some(current) if Arc::ptr_eq(current, store) => Arc::clone(current),
            _ => {
                return Err(Error::InternalConsistency(
                    "Released a handle whose shared store no longer exists".to_string(),
                ))
            }
        };
        if state.refs == 0 {
            return Err(Error::InternalConsistency(
                "Shared store reference count would drop below zero".to_string(),
            ));
        }

        state.refs -= 1;
        if state.refs == 0 {
            state.store = None;
            state.sizing = None;
            current.destroy();
            info!("Last reference released, shared off-heap store destroyed");
        }
        Ok(())
    }

    /// Number of live handles
    pub fn ref_count(&self) -> usize {
        self.state.lock().refs
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().store.is_some()
    }

    /// Layout of the live shared store
    pub fn sizing(&self) -> Option<Sizing> {
        self.state.lock().sizing
    }

    /// Tear down the shared store regardless of outstanding handles
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if let Some(store) = state.store.take() {
            state.sizing = None;
            if state.refs > 0 {
                warn!(refs = state.refs, "Shutting down shared store with live handles");
            }
            state.refs = 0;
            store.destroy();
        }
    }
}

/// One owner's reference to the shared store
pub struct SharedStoreHandle {
    store: Arc<ShardedStore>,
    registry: Arc<SharedStorageRegistry>,
    released: AtomicBool,
}

impl SharedStoreHandle {
    fn ensure_live(&self) -> Result<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(Error::Closed("shared store handle was destroyed".to_string()));
        }
        Ok(())
    }
}

impl OffHeapStore for SharedStoreHandle {
    fn put(&self, hash: i32, data: &[u8]) -> Result<EntryRef> {
        self.ensure_live()?;
        self.store.put(hash, data)
    }

    fn get_outcome(&self, hash: i32, entry: &EntryRef) -> Result<GetOutcome> {
        self.ensure_live()?;
        self.store.get_outcome(hash, entry)
    }

    fn remove(&self, hash: i32, entry: &EntryRef) -> Result<()> {
        self.ensure_live()?;
        self.store.remove(hash, entry)
    }

    /// Drop this reference; consistency failures are logged, not propagated
    fn destroy(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            let e = Error::InternalConsistency("Shared store handle destroyed twice".to_string());
            error!(error = %e, "Ignoring repeated destroy");
            return;
        }
        if let Err(e) = self.registry.release(&self.store) {
            error!(error = %e, "Failed to release shared off-heap store");
        }
    }

    fn stats(&self) -> StoreStats {
        self.store.stats()
    }
}
