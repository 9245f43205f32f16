//! Multi-threaded scenarios for the off-heap store
//!
//! These exercise the store the way cache records do: many threads writing,
//! reading and evicting through hash-routed segments at once.

#[cfg(test)]
mod integration {
    use crate::error::{Error, Result};
    use crate::storage::offheap::{
        EntryRef, GetOutcome, OffHeapStore, ShardedStore, SizingPolicy, SizingRequest,
    };
    use parking_lot::Mutex;
    use rayon::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn store(total_mb: u64, segments: u32, chunk_kb: u64) -> ShardedStore {
        let sizing = SizingPolicy::compute(SizingRequest {
            total_size_mb: total_mb,
            segment_count: Some(segments),
            chunk_size_kb: chunk_kb,
            memory_ceiling_bytes: u64::MAX,
        })
        .expect("valid sizing");
        ShardedStore::new(&sizing).expect("store")
    }

    fn value_for(i: usize) -> Vec<u8> {
        let len = 1 + (i * 733) % 9000;
        (0..len).map(|b| ((b + i) % 256) as u8).collect()
    }

    #[test]
    fn test_production_parallel_round_trip() -> Result<()> {
        let store = store(16, 4, 1);
        let total = store.stats().total_chunks;

        let entries: Vec<(i32, EntryRef)> = (0..2000usize)
            .into_par_iter()
            .map(|i| {
                let hash = (i as i32).wrapping_mul(0x9E37_79B9u32 as i32);
                store.put(hash, &value_for(i)).map(|entry| (hash, entry))
            })
            .collect::<Result<_>>()?;

        entries
            .par_iter()
            .enumerate()
            .try_for_each(|(i, (hash, entry))| -> Result<()> {
                assert_eq!(store.get(*hash, entry)?, Some(value_for(i)));
                Ok(())
            })?;

        let live: usize = entries.iter().map(|(_, e)| e.chunk_count()).sum();
        assert_eq!(store.stats().free_chunks + live, total);

        entries
            .par_iter()
            .try_for_each(|(hash, entry)| store.remove(*hash, entry))?;
        assert_eq!(store.stats().free_chunks, total);

        println!(
            "Parallel round trip: {} values over {} segments",
            entries.len(),
            store.segment_count()
        );
        Ok(())
    }

    #[test]
    fn test_production_reads_never_see_recycled_bytes() {
        // one tiny segment so removed chunks are reused almost immediately
        let store = Arc::new(store(1, 1, 1));
        let current: Arc<Mutex<Option<(EntryRef, u8)>>> = Arc::new(Mutex::new(None));
        let stop = Arc::new(AtomicBool::new(false));

        let writers: Vec<_> = (0..2u8)
            .map(|w| {
                let store = Arc::clone(&store);
                let current = Arc::clone(&current);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let mut tag = w;
                    while !stop.load(Ordering::Relaxed) {
                        tag = tag.wrapping_add(2);
                        let entry = match store.put(0, &vec![tag; 3000]) {
                            Ok(entry) => entry,
                            Err(Error::CapacityExhausted { .. }) => continue,
                            Err(e) => panic!("unexpected error: {}", e),
                        };
                        let previous = current.lock().replace((entry, tag));
                        if let Some((old, _)) = previous {
                            store.remove(0, &old).expect("remove");
                        }
                    }
                })
            })
            .collect();

        let mut hits = 0usize;
        let mut invalid = 0usize;
        for _ in 0..20_000 {
            let observed = current.lock().clone();
            let Some((entry, tag)) = observed else {
                continue;
            };
            match store.get_outcome(0, &entry).expect("get") {
                GetOutcome::Hit(bytes) => {
                    assert!(bytes.iter().all(|&b| b == tag), "read recycled bytes");
                    hits += 1;
                }
                GetOutcome::Invalid => invalid += 1,
                GetOutcome::Miss => {}
            }
        }

        stop.store(true, Ordering::Relaxed);
        for writer in writers {
            writer.join().expect("writer thread");
        }
        println!("Racing reads: {} hits, {} invalidated mid-copy", hits, invalid);
    }

    #[test]
    fn test_production_exhaustion_under_contention() {
        // 1 MB of 1 KB chunks: 1024 chunks, each put takes 4
        let store = store(1, 1, 1);
        let results: Vec<Result<EntryRef>> = (0..300)
            .into_par_iter()
            .map(|_| store.put(7, &[0xAB; 4096]))
            .collect();

        let stored = results.iter().filter(|r| r.is_ok()).count();
        let exhausted = results
            .iter()
            .filter(|r| matches!(r, Err(Error::CapacityExhausted { .. })))
            .count();
        assert_eq!(stored, 256);
        assert_eq!(exhausted, 44);
        assert_eq!(store.stats().free_chunks, 0);
    }
}
