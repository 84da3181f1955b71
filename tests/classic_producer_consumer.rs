//! Bounded-buffer producer/consumer (section 8, scenario 2): 3 producers x
//! 50 items, 2 consumers, a 10-slot ring buffer guarded by one mutex and two
//! condition variables (not-full / not-empty).

use std::sync::Arc;

use uthread::{self, Condvar, Mutex, MutexKind, RuntimeConfig, ThreadAttr};

const CAPACITY: usize = 10;
const PRODUCERS: usize = 3;
const ITEMS_PER_PRODUCER: usize = 50;
const CONSUMERS: usize = 2;

struct Buffer {
    mutex: Mutex,
    not_full: Condvar,
    not_empty: Condvar,
    queue: std::cell::RefCell<std::collections::VecDeque<u32>>,
    produced: std::cell::Cell<u32>,
    consumed: std::cell::Cell<u32>,
    producers_done: std::cell::Cell<usize>,
}

// Guarded exclusively by `mutex`; see the scheduler-ordering test for why a
// single-execution-stream runtime makes this sound despite `Sync`.
unsafe impl Sync for Buffer {}
unsafe impl Send for Buffer {}

#[test]
fn producer_consumer_exact_counts() {
    uthread::init(RuntimeConfig::default()).unwrap();

    let buf = Arc::new(Buffer {
        mutex: Mutex::new(MutexKind::Normal),
        not_full: Condvar::new(),
        not_empty: Condvar::new(),
        queue: std::cell::RefCell::new(std::collections::VecDeque::new()),
        produced: std::cell::Cell::new(0),
        consumed: std::cell::Cell::new(0),
        producers_done: std::cell::Cell::new(0),
    });

    let mut handles = Vec::new();

    for _ in 0..PRODUCERS {
        let buf = buf.clone();
        handles.push(
            uthread::spawn(ThreadAttr::default(), move || {
                for _ in 0..ITEMS_PER_PRODUCER {
                    let mut guard = buf.mutex.lock().unwrap();
                    while buf.queue.borrow().len() == CAPACITY {
                        guard = buf.not_full.wait(guard).unwrap();
                    }
                    buf.queue.borrow_mut().push_back(1);
                    buf.produced.set(buf.produced.get() + 1);
                    buf.not_empty.signal();
                    drop(guard);
                }
                let guard = buf.mutex.lock().unwrap();
                buf.producers_done.set(buf.producers_done.get() + 1);
                buf.not_empty.broadcast();
                drop(guard);
            })
            .unwrap(),
        );
    }

    for _ in 0..CONSUMERS {
        let buf = buf.clone();
        handles.push(
            uthread::spawn(ThreadAttr::default(), move || loop {
                let mut guard = buf.mutex.lock().unwrap();
                while buf.queue.borrow().is_empty() {
                    if buf.producers_done.get() == PRODUCERS {
                        return;
                    }
                    guard = buf.not_empty.wait(guard).unwrap();
                }
                if let Some(item) = buf.queue.borrow_mut().pop_front() {
                    buf.consumed.set(buf.consumed.get() + item);
                    buf.not_full.signal();
                }
                drop(guard);
            })
            .unwrap(),
        );
    }

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(buf.produced.get() as usize, PRODUCERS * ITEMS_PER_PRODUCER);
    assert_eq!(buf.consumed.get() as usize, PRODUCERS * ITEMS_PER_PRODUCER);
    assert!(buf.queue.borrow().is_empty());

    uthread::shutdown();
}
