//! Library lifecycle and the thread-centric public API (section 6).

use std::any::Any;
use std::cell::RefCell;
use std::time::Duration;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::policy::{SchedPolicy, SchedPolicyKind, DEFAULT_TIMESLICE_NS};
use crate::stack::{Stack, STACK_DEFAULT, STACK_MAX, STACK_MIN};
use crate::tcb::{
    Entry, Registry, ThreadAttr, ThreadId, ThreadState, Tcb, IDLE_TID, NICE_MAX, NICE_MIN,
    PRIORITY_MAX, PRIORITY_MIN,
};
use crate::time::{nice_to_weight, now_ns};

const MAX_THREADS: usize = 1024;

/// Snapshot of scheduler counters (section 4.12).
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub context_switches: u64,
    pub scheduler_invocations: u64,
    pub scheduler_ticks: u64,
    pub total_runtime_ns: u64,
    pub threads_created: u64,
}

/// Tunables passed to `init`.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    pub policy: SchedPolicyKind,
    pub timeslice_ns: u64,
    pub default_stack_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            policy: SchedPolicyKind::RoundRobin,
            timeslice_ns: DEFAULT_TIMESLICE_NS,
            default_stack_size: STACK_DEFAULT,
        }
    }
}

pub(crate) struct Runtime {
    pub registry: Registry,
    pub policy: Box<dyn SchedPolicy>,
    pub policy_kind: SchedPolicyKind,
    pub current: ThreadId,
    pub in_scheduler: bool,
    pub preemption_enabled: bool,
    pub timeslice_ns: u64,
    pub default_stack_size: usize,
    pub stats: Stats,
}

thread_local! {
    static RUNTIME: RefCell<Option<Runtime>> = const { RefCell::new(None) };
}

/// Run `f` with shared access to the runtime.
///
/// # Panics
/// Panics if the library has not been `init`-ed, or if called reentrantly
/// from within another `with_runtime`/`with_runtime_mut` closure.
pub(crate) fn with_runtime<T>(f: impl FnOnce(&Runtime) -> T) -> T {
    RUNTIME.with(|cell| {
        let guard = cell.borrow();
        let rt = guard.as_ref().expect("uthread runtime is not initialized");
        f(rt)
    })
}

pub(crate) fn with_runtime_mut<T>(f: impl FnOnce(&mut Runtime) -> T) -> T {
    RUNTIME.with(|cell| {
        let mut guard = cell.borrow_mut();
        let rt = guard.as_mut().expect("uthread runtime is not initialized");
        f(rt)
    })
}

pub fn is_initialized() -> bool {
    RUNTIME.with(|cell| cell.borrow().is_some())
}

pub(crate) fn in_scheduler() -> bool {
    RUNTIME.with(|cell| {
        cell.borrow()
            .as_ref()
            .map(|rt| rt.in_scheduler)
            .unwrap_or(false)
    })
}

pub(crate) fn current_in_critical_section() -> bool {
    RUNTIME.with(|cell| {
        cell.borrow()
            .as_ref()
            .and_then(|rt| rt.registry.get(rt.current).map(|t| t.in_critical_section))
            .unwrap_or(false)
    })
}

pub(crate) fn current_tid() -> ThreadId {
    with_runtime(|rt| rt.current)
}

/// RAII critical-section guard: blocks the timer signal for its lifetime.
pub(crate) struct PreemptGuard;

impl PreemptGuard {
    pub fn new() -> Self {
        crate::preempt::preemption_disable();
        PreemptGuard
    }
}

impl Drop for PreemptGuard {
    fn drop(&mut self) {
        crate::preempt::preemption_enable();
    }
}

/// Entry-point trampoline: the target of every non-main thread's initial
/// context (section 4.1). Never returns to its caller.
extern "C" fn trampoline() {
    // Inherits the +1 preemption-disable depth left by whichever call
    // scheduled this thread in for the first time; rebalance it here.
    crate::preempt::preemption_enable();

    let current = current_tid();
    let entry: Option<Entry> =
        with_runtime_mut(|rt| rt.registry.get_mut(current).and_then(|t| t.entry.take()));

    let result: Box<dyn Any + Send> = match entry {
        Some(f) => f(),
        None => Box::new(()),
    };

    exit_current(result)
}

/// Implements the exit lifecycle (section 4.6). Does not return.
pub(crate) fn exit_current(retval: Box<dyn Any + Send>) -> ! {
    crate::preempt::preemption_disable();

    let current = current_tid();
    let (joiner, detached) = with_runtime_mut(|rt| {
        rt.policy.remove(&mut rt.registry, current);
        match rt.registry.get_mut(current) {
            Some(t) => {
                t.retval = Some(retval);
                t.exited = true;
                t.state = ThreadState::Terminated;
                debug!("thread {} '{:?}' exiting", current.0, t.name);
                (t.joiner, t.detached)
            }
            None => (None, true),
        }
    });

    if let Some(joiner) = joiner {
        with_runtime_mut(|rt| {
            if let Some(j) = rt.registry.get_mut(joiner) {
                j.waiting_on = None;
            }
        });
        crate::scheduler::unblock(joiner);
    }

    if detached {
        with_runtime_mut(|rt| {
            rt.registry.remove(current);
        });
    }

    // This stack frame's `schedule()` call never returns (this context is
    // never resumed again), so the preemption-disable depth incremented
    // above would otherwise leak; rebalance explicitly before the switch
    // instead of relying on a guard whose `Drop` would never run.
    crate::preempt::preemption_enable();
    crate::scheduler::schedule();
    unreachable!("scheduler resumed an exited thread")
}

/// Bring up the runtime: install the policy, bootstrap the calling OS
/// thread as the "main" TCB, install the timer signal handler, and start
/// preemption.
pub fn init(config: RuntimeConfig) -> Result<()> {
    if is_initialized() {
        return Err(Error::InvalidArgument);
    }

    let mut registry = Registry::new(MAX_THREADS);
    registry.insert(Tcb::new_idle())?;

    let mut main_tcb = Tcb::new_idle();
    // Any id other than `IDLE_TID` makes `insert` auto-assign the real one.
    main_tcb.id = ThreadId(usize::MAX);
    main_tcb.name = Some("main".to_string());
    main_tcb.state = ThreadState::Running;
    main_tcb.priority = crate::tcb::PRIORITY_DEFAULT;
    main_tcb.detached = false;
    main_tcb.start_time = now_ns();
    main_tcb.context.capture_current();
    let main_id = registry.insert(main_tcb)?;

    let policy = config.policy.build();
    let policy_name = policy.name();

    let runtime = Runtime {
        registry,
        policy,
        policy_kind: config.policy,
        current: main_id,
        in_scheduler: false,
        preemption_enabled: true,
        timeslice_ns: config.timeslice_ns.max(1_000_000),
        default_stack_size: config.default_stack_size.clamp(STACK_MIN, STACK_MAX),
        stats: Stats::default(),
    };

    RUNTIME.with(|cell| {
        *cell.borrow_mut() = Some(runtime);
    });

    crate::preempt::timer_init();
    crate::preempt::timer_start(config.timeslice_ns.max(1_000_000));

    info!("uthread runtime initialized with {} scheduler", policy_name);

    Ok(())
}

/// Tear down the runtime: stop the timer, drop every TCB, drop the policy.
pub fn shutdown() {
    if !is_initialized() {
        return;
    }
    crate::preempt::timer_shutdown();
    RUNTIME.with(|cell| {
        *cell.borrow_mut() = None;
    });
    debug!("uthread runtime shut down");
}

pub fn policy_name() -> &'static str {
    with_runtime(|rt| rt.policy.name())
}

pub fn policy_kind() -> SchedPolicyKind {
    with_runtime(|rt| rt.policy_kind)
}

/// A joinable handle to a spawned thread, typed by its return value.
pub struct JoinHandle<T> {
    id: ThreadId,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Send + 'static> JoinHandle<T> {
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Block until the thread finishes, returning the value its entry
    /// closure produced.
    pub fn join(self) -> Result<T> {
        let boxed = join_raw(self.id)?;
        Ok(*boxed
            .downcast::<T>()
            .expect("JoinHandle<T> type must match the spawned closure's return type"))
    }

    pub fn detach(self) -> Result<()> {
        detach_raw(self.id)
    }
}

fn join_raw(target: ThreadId) -> Result<Box<dyn Any + Send>> {
    let _guard = PreemptGuard::new();
    let self_id = current_tid();
    debug!("thread {} joining thread {}", self_id.0, target.0);

    if target == self_id {
        return Err(Error::WouldDeadlock);
    }

    let (detached, existing_joiner) = with_runtime(|rt| {
        rt.registry
            .get(target)
            .map(|t| (t.detached, t.joiner))
            .ok_or(Error::NoSuchThread)
    })?;

    if detached {
        return Err(Error::InvalidArgument);
    }
    if existing_joiner.is_some() && existing_joiner != Some(self_id) {
        return Err(Error::InvalidArgument);
    }

    loop {
        let exited = with_runtime(|rt| rt.registry.get(target).map(|t| t.exited).unwrap_or(true));
        if exited {
            break;
        }
        with_runtime_mut(|rt| {
            if let Some(t) = rt.registry.get_mut(target) {
                t.joiner = Some(self_id);
            }
            if let Some(s) = rt.registry.get_mut(self_id) {
                s.waiting_on = Some(target);
                s.state = ThreadState::Blocked;
            }
        });
        crate::scheduler::schedule();
    }

    let retval = with_runtime_mut(|rt| rt.registry.get_mut(target).and_then(|t| t.retval.take()));
    with_runtime_mut(|rt| {
        rt.registry.remove(target);
    });

    debug!("thread {} joined thread {}", self_id.0, target.0);
    Ok(retval.unwrap_or_else(|| Box::new(())))
}

fn detach_raw(target: ThreadId) -> Result<()> {
    let _guard = PreemptGuard::new();
    let outcome = with_runtime_mut(|rt| {
        let t = rt.registry.get_mut(target).ok_or(Error::NoSuchThread)?;
        if t.detached {
            return Err(Error::InvalidArgument);
        }
        if t.joiner.is_some() {
            return Err(Error::InvalidArgument);
        }
        t.detached = true;
        Ok(t.exited)
    })?;

    if outcome {
        with_runtime_mut(|rt| {
            rt.registry.remove(target);
        });
    }
    debug!("thread {} detached", target.0);
    Ok(())
}

/// Spawn a new user thread running `f`, returning a typed join handle.
pub fn spawn<F, T>(attr: ThreadAttr, f: F) -> Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let _guard = PreemptGuard::new();

    if !(STACK_MIN..=STACK_MAX).contains(&attr.stack_size) && attr.stack_size != 0 {
        return Err(Error::InvalidArgument);
    }
    let stack_size = if attr.stack_size == 0 {
        with_runtime(|rt| rt.default_stack_size)
    } else {
        attr.stack_size
    };
    if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&attr.priority) {
        return Err(Error::InvalidArgument);
    }
    if !(NICE_MIN..=NICE_MAX).contains(&attr.nice) {
        return Err(Error::InvalidArgument);
    }

    let stack = Stack::alloc(stack_size)?;
    let entry: Entry = Box::new(move || Box::new(f()) as Box<dyn Any + Send>);

    let mut tcb = Tcb::new_idle();
    // Any id other than `IDLE_TID` makes `insert` auto-assign the real one
    // (mirrors the main-TCB bootstrap above); `new_idle` is reused here only
    // as a zero-initializer, not to claim the idle slot.
    tcb.id = ThreadId(usize::MAX);
    tcb.name = attr.name.clone();
    tcb.state = ThreadState::Ready;
    tcb.priority = attr.priority;
    tcb.nice = attr.nice;
    tcb.weight = nice_to_weight(attr.nice);
    tcb.detached = attr.detached;
    tcb.entry = Some(entry);
    tcb.context.init(&stack, trampoline);
    tcb.stack = Some(stack);

    let tid = with_runtime_mut(|rt| -> Result<ThreadId> {
        let tid = rt.registry.insert(tcb)?;
        rt.policy.enqueue(&mut rt.registry, tid);
        rt.stats.threads_created += 1;
        Ok(tid)
    })?;

    debug!("created thread {} (priority={})", tid.0, attr.priority);

    Ok(JoinHandle {
        id: tid,
        _marker: std::marker::PhantomData,
    })
}

pub fn current() -> ThreadId {
    current_tid()
}

pub fn equal(a: ThreadId, b: ThreadId) -> bool {
    a == b
}

pub fn tid(handle: ThreadId) -> usize {
    handle.0
}

/// Voluntarily yield the CPU (section 4.6).
pub fn yield_now() {
    let _guard = PreemptGuard::new();
    crate::scheduler::yield_now();
}

/// Busy-yield until `dur` has elapsed (best-effort, no timer wheel).
pub fn sleep(dur: Duration) {
    if current_tid() == IDLE_TID {
        return;
    }
    let deadline = now_ns() + dur.as_nanos() as u64;
    while now_ns() < deadline {
        yield_now();
    }
}

/// Terminate the calling thread with `retval`. Never returns.
pub fn exit<T: Send + 'static>(retval: T) -> ! {
    exit_current(Box::new(retval))
}

pub fn set_timeslice(dur: Duration) -> Result<()> {
    let ns = dur.as_nanos() as u64;
    if ns < 1_000_000 {
        return Err(Error::InvalidArgument);
    }
    with_runtime_mut(|rt| rt.timeslice_ns = ns);
    crate::preempt::timer_set_interval(ns);
    Ok(())
}

pub fn timeslice() -> Duration {
    Duration::from_nanos(with_runtime(|rt| rt.timeslice_ns))
}

/// Enable or disable preemption process-wide; returns the prior state.
pub fn set_preemption(enabled: bool) -> bool {
    with_runtime_mut(|rt| {
        let prev = rt.preemption_enabled;
        rt.preemption_enabled = enabled;
        prev
    })
}

pub fn set_priority(handle: ThreadId, priority: i32) -> Result<()> {
    if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
        return Err(Error::InvalidArgument);
    }
    let _guard = PreemptGuard::new();
    with_runtime_mut(|rt| {
        if let Some(t) = rt.registry.get_mut(handle) {
            t.priority = priority;
        } else {
            return Err(Error::NoSuchThread);
        }
        rt.policy.update_priority(&mut rt.registry, handle);
        Ok(())
    })
}

pub fn priority(handle: ThreadId) -> Result<i32> {
    with_runtime(|rt| rt.registry.get(handle).map(|t| t.priority))
        .ok_or(Error::NoSuchThread)
}

pub fn set_nice(handle: ThreadId, nice: i32) -> Result<()> {
    if !(NICE_MIN..=NICE_MAX).contains(&nice) {
        return Err(Error::InvalidArgument);
    }
    let _guard = PreemptGuard::new();
    with_runtime_mut(|rt| {
        if let Some(t) = rt.registry.get_mut(handle) {
            t.nice = nice;
        } else {
            return Err(Error::NoSuchThread);
        }
        rt.policy.update_priority(&mut rt.registry, handle);
        Ok(())
    })
}

pub fn nice(handle: ThreadId) -> Result<i32> {
    with_runtime(|rt| rt.registry.get(handle).map(|t| t.nice)).ok_or(Error::NoSuchThread)
}

pub fn stats() -> Stats {
    with_runtime(|rt| {
        let mut s = rt.stats;
        s.total_runtime_ns = rt
            .registry
            .all_ids()
            .into_iter()
            .filter_map(|id| rt.registry.get(id))
            .map(|t| t.total_runtime)
            .sum();
        s
    })
}

pub fn reset_stats() {
    with_runtime_mut(|rt| rt.stats = Stats::default());
}
