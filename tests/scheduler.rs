//! End-to-end scheduler scenarios (section 8): ping-pong turn alternation
//! and priority-strictness ordering, driving the library the way an external
//! consumer would.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use uthread::{self, MutexKind, RuntimeConfig, SchedPolicyKind, ThreadAttr};

fn with_runtime<T>(config: RuntimeConfig, f: impl FnOnce() -> T) -> T {
    let _ = env_logger::try_init();
    uthread::init(config).unwrap();
    let result = f();
    uthread::shutdown();
    result
}

#[test]
fn ping_pong_alternates_ten_thousand_times() {
    with_runtime(RuntimeConfig::default(), || {
        let turn = Arc::new(AtomicI32::new(0));

        let t2 = turn.clone();
        let pong = uthread::spawn(ThreadAttr::default(), move || {
            let mut flips = 0u32;
            while flips < 10_000 {
                while t2.load(Ordering::SeqCst) != 1 {
                    uthread::yield_now();
                }
                t2.store(0, Ordering::SeqCst);
                flips += 1;
            }
        })
        .unwrap();

        let mut flips = 0u32;
        while flips < 10_000 {
            turn.store(1, Ordering::SeqCst);
            while turn.load(Ordering::SeqCst) != 0 {
                uthread::yield_now();
            }
            flips += 1;
        }

        pong.join().unwrap();
        assert_eq!(turn.load(Ordering::SeqCst), 0);
    });
}

#[test]
fn priority_ordering_is_strict_on_an_idle_system() {
    let config = RuntimeConfig {
        policy: SchedPolicyKind::Priority,
        ..RuntimeConfig::default()
    };
    with_runtime(config, || {
        // Dogfoods the library's own mutex alongside a plain `std::sync`
        // container for the payload (the uthread lock carries no data of
        // its own, mirroring a bare pthread_mutex_t).
        let order = Arc::new(uthread::Mutex::new(MutexKind::Normal));
        let log = Arc::new(StdMutex::new(Vec::new()));
        let start_gate = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::new();
        for priority in [10, 20, 30] {
            let order = order.clone();
            let log = log.clone();
            let gate = start_gate.clone();
            let attr = ThreadAttr {
                priority,
                ..ThreadAttr::default()
            };
            handles.push(
                uthread::spawn(attr, move || {
                    while !gate.load(Ordering::SeqCst) {
                        uthread::yield_now();
                    }
                    let _guard = order.lock().unwrap();
                    log.lock().unwrap().push(priority);
                })
                .unwrap(),
            );
        }

        start_gate.store(true, Ordering::SeqCst);
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(*log.lock().unwrap(), vec![30, 20, 10]);
    });
}
