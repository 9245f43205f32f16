//! Integration tests for record maps over off-heap storage

use photon_offheap::config::FixedCeiling;
use photon_offheap::error::Result;
use photon_offheap::{
    InMemoryFormat, OffHeapConfig, OffHeapStore, RecordMap, RecordStore, SharedStorageRegistry,
    StorageFactory,
};
use std::sync::Arc;
use std::thread;

fn off_heap_map(name: &str) -> Result<RecordMap> {
    let config = OffHeapConfig {
        enabled: true,
        total_size: "8m".to_string(),
        chunk_size: "1k".to_string(),
        segment_count: Some(4),
        ..OffHeapConfig::default()
    };
    let factory = StorageFactory::new(
        Box::new(FixedCeiling(Some(1 << 30))),
        SharedStorageRegistry::new(),
    );
    let store = factory.create(&config)?;
    let storage = RecordStore::for_format(config.in_memory_format, Some(store))?;
    Ok(RecordMap::new(name, storage))
}

#[test]
fn test_record_map_concurrent_writers_and_readers() -> Result<()> {
    let map = Arc::new(off_heap_map("sessions")?);
    assert_eq!(map.storage().format(), InMemoryFormat::OffHeap);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let map = Arc::clone(&map);
            thread::spawn(move || -> Result<()> {
                for round in 0..200u32 {
                    let key = format!("session:{}", round % 20);
                    let fill = (t * 31 + round) as u8;
                    map.put(key.as_bytes(), &vec![fill; 1500 + (round as usize % 700)])?;

                    if let Some(bytes) = map.get(key.as_bytes())? {
                        // whatever we read must be one writer's complete value
                        assert!(bytes.iter().all(|&b| b == bytes[0]));
                    }
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker thread")?;
    }

    assert_eq!(map.len(), 20);
    map.clear()?;
    assert!(map.is_empty());
    if let RecordStore::OffHeap(store) = map.storage() {
        assert_eq!(store.stats().used_chunks, 0);
    }
    map.destroy()?;
    Ok(())
}

#[test]
fn test_binary_format_map_stays_on_heap() -> Result<()> {
    let storage = RecordStore::for_format(InMemoryFormat::Binary, None)?;
    let map = RecordMap::new("heap", storage);
    map.put(b"k", b"value")?;
    assert_eq!(map.get(b"k")?, Some(b"value".to_vec()));
    assert_eq!(map.put(b"k", b"next")?, Some(b"value".to_vec()));
    Ok(())
}
