//! Writer-preferring readers/writers (section 8, scenario 4): 5 readers x 10
//! reads, 2 writers x 5 writes, against one shared integer.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use uthread::{self, RuntimeConfig, RwLock, ThreadAttr};

const READERS: usize = 5;
const READS_PER_READER: usize = 10;
const WRITERS: usize = 2;
const WRITES_PER_WRITER: usize = 5;

#[test]
fn readers_writers_exact_counts() {
    uthread::init(RuntimeConfig::default()).unwrap();

    let lock = Arc::new(RwLock::new());
    // Guarded exclusively by `lock`; see classic_producer_consumer for the
    // rationale behind asserting `Sync` on a `Cell` shared this way.
    struct Shared(std::cell::Cell<i32>);
    unsafe impl Sync for Shared {}
    let shared_cell = Arc::new(Shared(std::cell::Cell::new(0)));

    let reads_done = Arc::new(AtomicU32::new(0));
    let writes_done = Arc::new(AtomicU32::new(0));
    let sentinels: Vec<i32> = (100..100 + (WRITERS * WRITES_PER_WRITER) as i32).collect();

    let mut handles = Vec::new();

    for w in 0..WRITERS {
        let lock = lock.clone();
        let shared_cell = shared_cell.clone();
        let writes_done = writes_done.clone();
        let sentinels = sentinels.clone();
        handles.push(
            uthread::spawn(ThreadAttr::default(), move || {
                for k in 0..WRITES_PER_WRITER {
                    let _guard = lock.write().unwrap();
                    shared_cell.0.set(sentinels[w * WRITES_PER_WRITER + k]);
                    writes_done.fetch_add(1, Ordering::SeqCst);
                    drop(_guard);
                    uthread::yield_now();
                }
            })
            .unwrap(),
        );
    }

    for _ in 0..READERS {
        let lock = lock.clone();
        let shared_cell = shared_cell.clone();
        let reads_done = reads_done.clone();
        handles.push(
            uthread::spawn(ThreadAttr::default(), move || {
                for _ in 0..READS_PER_READER {
                    let _guard = lock.read().unwrap();
                    let _ = shared_cell.0.get();
                    reads_done.fetch_add(1, Ordering::SeqCst);
                    drop(_guard);
                    uthread::yield_now();
                }
            })
            .unwrap(),
        );
    }

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(
        reads_done.load(Ordering::SeqCst) as usize,
        READERS * READS_PER_READER
    );
    assert_eq!(
        writes_done.load(Ordering::SeqCst) as usize,
        WRITERS * WRITES_PER_WRITER
    );
    assert!(sentinels.contains(&shared_cell.0.get()));

    uthread::shutdown();
}
