//! Parallel sum (section 8, scenario 5): `[1..=10000]` split across 4
//! workers, aggregated both via join return values and via a shared,
//! mutex-guarded accumulator.

use std::sync::Arc;

use uthread::{self, Mutex, MutexKind, RuntimeConfig, ThreadAttr};

const N: u64 = 10_000;
const WORKERS: u64 = 4;

#[test]
fn parallel_sum_matches_closed_form() {
    uthread::init(RuntimeConfig::default()).unwrap();

    let expected = N * (N + 1) / 2;
    let chunk = N / WORKERS;

    // Aggregated via the shared accumulator under a mutex.
    let total = Arc::new(Mutex::new(MutexKind::Normal));
    struct Accumulator(std::cell::Cell<u64>);
    unsafe impl Sync for Accumulator {}
    let accumulator = Arc::new(Accumulator(std::cell::Cell::new(0)));

    let mut handles = Vec::new();
    for w in 0..WORKERS {
        let lo = w * chunk + 1;
        let hi = if w == WORKERS - 1 { N } else { (w + 1) * chunk };
        let total = total.clone();
        let accumulator = accumulator.clone();
        handles.push(uthread::spawn(ThreadAttr::default(), move || {
            let partial: u64 = (lo..=hi).sum();
            let _guard = total.lock().unwrap();
            accumulator.0.set(accumulator.0.get() + partial);
            drop(_guard);
            partial
        }));
    }

    let mut join_aggregated = 0u64;
    for h in handles {
        join_aggregated += h.unwrap().join().unwrap();
    }

    assert_eq!(join_aggregated, expected);
    assert_eq!(accumulator.0.get(), expected);

    uthread::shutdown();
}
