//! Scheduler Core - strict-priority dispatch with synchronous preemption
//!
//! One logical CPU, one process-wide scheduler context. All queues, the
//! thread table and the primitive registries live in a single `Core` guarded
//! by a spin mutex: on this single-CPU design the held lock is the
//! "interrupts disabled" exclusive section, so every operation is one bounded
//! critical section that never blocks inside it.
//!
//! Dispatch rule: highest effective priority wins, FIFO among equals. Any
//! unblock or priority change re-evaluates preemption immediately; waiting
//! for the next tick would silently defeat priority scheduling.
//!
//! The register-level switch is owned by the platform layer; this core makes
//! the decision, updates `current`, and records the switch.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::vec::Vec;
use hashbrown::HashMap;
use spin::Mutex;

use super::error::{SchedulerError, SchedulerResult};
use crate::scheduler::mlfqs::{mlfqs_priority, Fixed};
use crate::scheduler::thread::{
    alloc_thread_id, QueueLocation, Stack, Thread, ThreadEntry, ThreadId, ThreadState,
    DEFAULT_KERNEL_STACK_SIZE, NICE_MAX, NICE_MIN, PRI_DEFAULT, PRI_MAX, PRI_MIN,
};
use crate::sched_assert;
use crate::sync::{CondState, CondvarId, LockId, LockState, SemaState, SemaphoreId};

/// Ticks each thread gets before round-robin rotation.
pub const TIME_SLICE: u32 = 4;

/// Hard cap on live threads; create() fails past this.
pub const MAX_THREADS: usize = 1024;

/// Scheduling policy, fixed at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    /// Strict priority with donation, round-robin among equals (default)
    Priority,
    /// Multi-level feedback queue: priorities derived from recent CPU + nice
    Mlfqs,
}

/// Scheduler statistics snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    pub total_spawns: u64,
    pub total_switches: u64,
    pub idle_ticks: i64,
    pub kernel_ticks: i64,
}

/// All mutable scheduler state. Only ever touched under the `Scheduler` lock.
pub struct Core {
    pub(crate) policy: SchedPolicy,

    /// Thread table. BTreeMap so the MLFQS sweeps iterate deterministically.
    pub(crate) threads: BTreeMap<ThreadId, Thread>,

    /// Ready queue in arrival order; dispatch scans for the first maximum so
    /// equal-priority threads keep round-robin order.
    pub(crate) ready: VecDeque<ThreadId>,

    /// Sleeping threads ordered by wakeup tick (ties keep insertion order).
    pub(crate) sleepers: Vec<ThreadId>,

    /// The running thread.
    pub(crate) current: ThreadId,

    /// The idle thread: runs when the ready queue is empty, never enqueued,
    /// never counted by MLFQS.
    pub(crate) idle: ThreadId,

    /// Global tick counter.
    pub(crate) ticks: i64,

    /// Ticks the current thread has held the CPU since last dispatch.
    pub(crate) slice_used: u32,

    /// System load average (MLFQS mode).
    pub(crate) load_avg: Fixed,

    // Primitive registries, keyed by handle id.
    pub(crate) semas: HashMap<SemaphoreId, SemaState>,
    pub(crate) locks: HashMap<LockId, LockState>,
    pub(crate) conds: HashMap<CondvarId, CondState>,
    pub(crate) next_handle: u64,

    pub(crate) stats: SchedulerStats,
}

/// The scheduler: a `Core` behind the exclusive-section lock.
pub struct Scheduler {
    core: Mutex<Core>,
}

impl Core {
    fn new(policy: SchedPolicy) -> Core {
        let boot_stack = Stack::new(DEFAULT_KERNEL_STACK_SIZE).expect("boot thread stack");
        let idle_stack = Stack::new(DEFAULT_KERNEL_STACK_SIZE).expect("idle thread stack");

        let boot_id = alloc_thread_id();
        let idle_id = alloc_thread_id();

        let mut boot = Thread::new(boot_id, "main", PRI_DEFAULT, None, boot_stack);
        boot.state = ThreadState::Running;

        // Idle sits at PRI_MIN and is dispatched only as a fallback.
        let idle = Thread::new(idle_id, "idle", PRI_MIN, None, idle_stack);

        let mut threads = BTreeMap::new();
        threads.insert(boot_id, boot);
        threads.insert(idle_id, idle);

        Core {
            policy,
            threads,
            ready: VecDeque::new(),
            sleepers: Vec::new(),
            current: boot_id,
            idle: idle_id,
            ticks: 0,
            slice_used: 0,
            load_avg: Fixed::ZERO,
            semas: HashMap::new(),
            locks: HashMap::new(),
            conds: HashMap::new(),
            next_handle: 1,
            stats: SchedulerStats::default(),
        }
    }

    // ── Thread table access ─────────────────────────────────────────────────

    pub(crate) fn thread(&self, tid: ThreadId) -> &Thread {
        let t = self.threads.get(&tid);
        sched_assert!(t.is_some(), "thread {} not in table", tid);
        t.unwrap()
    }

    pub(crate) fn thread_mut(&mut self, tid: ThreadId) -> &mut Thread {
        let t = self.threads.get_mut(&tid);
        sched_assert!(t.is_some(), "thread {} not in table", tid);
        t.unwrap()
    }

    /// The running thread, canary-checked on every access.
    pub(crate) fn current_thread(&self) -> &Thread {
        let t = self.thread(self.current);
        sched_assert!(t.magic_intact(), "control block of {} corrupted", t.id());
        sched_assert!(
            t.state() == ThreadState::Running,
            "current thread {} is {}",
            t.id(),
            t.state()
        );
        t
    }

    pub(crate) fn alloc_handle(&mut self) -> u64 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    // ── Ready queue ─────────────────────────────────────────────────────────

    /// Put a thread on the ready queue (idle is tracked but never enqueued).
    pub(crate) fn ready_insert(&mut self, tid: ThreadId) {
        let idle = self.idle;
        let t = self.thread_mut(tid);
        t.state = ThreadState::Ready;
        if tid == idle {
            t.queue = QueueLocation::Nowhere;
        } else {
            t.queue = QueueLocation::Ready;
            self.ready.push_back(tid);
        }
    }

    /// Effective priority of the best ready thread, if any.
    pub(crate) fn best_ready_priority(&self) -> Option<u8> {
        self.ready
            .iter()
            .map(|&tid| self.thread(tid).effective_priority())
            .max()
    }

    /// Remove and return the first ready thread with maximum effective
    /// priority. Scanning from the front keeps FIFO order among equals.
    fn pop_max_ready(&mut self) -> Option<ThreadId> {
        let mut best: Option<(usize, u8)> = None;
        for (i, &tid) in self.ready.iter().enumerate() {
            let pri = self.thread(tid).effective_priority();
            match best {
                Some((_, bp)) if bp >= pri => {}
                _ => best = Some((i, pri)),
            }
        }
        let (idx, _) = best?;
        self.ready.remove(idx)
    }

    /// Pick the index of the first maximum-effective-priority entry in a wait
    /// list. Used by every primitive: plain FIFO wakeup would defeat priority
    /// scheduling. Selection happens at wake time because donations can change
    /// a waiter's effective priority while it is blocked.
    pub(crate) fn pick_highest(&self, waiters: &[ThreadId]) -> Option<usize> {
        let mut best: Option<(usize, u8)> = None;
        for (i, &tid) in waiters.iter().enumerate() {
            let pri = self.thread(tid).effective_priority();
            match best {
                Some((_, bp)) if bp >= pri => {}
                _ => best = Some((i, pri)),
            }
        }
        best.map(|(i, _)| i)
    }

    // ── Dispatch ────────────────────────────────────────────────────────────

    /// Switch to the best ready thread (or idle). The caller must already
    /// have moved `current` out of Running and onto its destination queue.
    /// Reclaims Dying threads once they have been switched away from.
    pub(crate) fn schedule(&mut self) {
        let prev = self.current;
        sched_assert!(
            self.thread(prev).state() != ThreadState::Running,
            "schedule() with {} still Running",
            prev
        );

        let next = self.pop_max_ready().unwrap_or(self.idle);
        {
            let t = self.thread_mut(next);
            t.state = ThreadState::Running;
            t.queue = QueueLocation::Nowhere;
        }
        self.current = next;
        self.slice_used = 0;
        if next != prev {
            self.stats.total_switches += 1;
            log::trace!("switch: {} -> {}", prev, next);
        }

        // A Dying thread cannot free its own live stack; now that we have
        // switched away from it, its storage can go.
        let current = self.current;
        self.threads
            .retain(|&id, t| id == current || t.state() != ThreadState::Dying);
    }

    /// Running -> Ready, re-enqueue, redispatch.
    pub(crate) fn yield_current(&mut self) {
        let cur = self.current;
        self.current_thread(); // canary + state check
        self.ready_insert(cur);
        self.schedule();
    }

    /// If a ready thread outranks the running one, preempt right now.
    /// Idle is preempted by anything runnable.
    pub(crate) fn check_preempt(&mut self) {
        let cur = self.current_thread().effective_priority();
        let preempt = match self.best_ready_priority() {
            Some(best) => self.current == self.idle || best > cur,
            None => false,
        };
        if preempt {
            self.yield_current();
        }
    }

    /// Running -> Blocked. The caller must already have put the thread on the
    /// wait or sleep list it will be woken from.
    pub(crate) fn block_current(&mut self) {
        let cur = self.current;
        sched_assert!(cur != self.idle, "idle thread cannot block");
        {
            let t = self.current_thread();
            sched_assert!(
                t.queue.is_wait_list(),
                "block() without a wait-list entry (thread {})",
                cur
            );
        }
        self.thread_mut(cur).state = ThreadState::Blocked;
        self.schedule();
    }

    /// Blocked -> Ready without the preemption re-check. The thread must have
    /// been removed from its wait list already.
    pub(crate) fn unblock_no_preempt(&mut self, tid: ThreadId) {
        let t = self.thread_mut(tid);
        sched_assert!(
            t.state() == ThreadState::Blocked,
            "unblock of non-Blocked thread {} ({})",
            tid,
            t.state()
        );
        sched_assert!(
            t.queue == QueueLocation::Nowhere,
            "unblock of thread {} still on a queue",
            tid
        );
        self.ready_insert(tid);
    }

    /// Blocked -> Ready, then the mandatory preemption re-evaluation.
    pub(crate) fn unblock_inner(&mut self, tid: ThreadId) {
        self.unblock_no_preempt(tid);
        self.check_preempt();
    }

    /// Debug aid: verify the queue tag of every thread agrees with its state.
    #[cfg(test)]
    pub(crate) fn assert_queue_invariant(&self) {
        use crate::scheduler::thread::location_matches_state;
        for t in self.threads.values() {
            assert!(
                location_matches_state(t.state(), t.queue),
                "thread {} state {} but queue {:?}",
                t.id(),
                t.state(),
                t.queue
            );
        }
    }
}

impl Scheduler {
    /// Boot the scheduler: creates the boot thread (Running) and the idle
    /// thread. The policy is immutable afterwards.
    pub fn new(policy: SchedPolicy) -> Scheduler {
        log::info!("scheduler: booting with {:?} policy", policy);
        Scheduler {
            core: Mutex::new(Core::new(policy)),
        }
    }

    /// Run a closure inside the exclusive section. Crate-internal: the sync
    /// and alarm modules funnel their state changes through this.
    pub(crate) fn with_core<R>(&self, f: impl FnOnce(&mut Core) -> R) -> R {
        f(&mut self.core.lock())
    }

    /// Boot-time policy.
    pub fn policy(&self) -> SchedPolicy {
        self.with_core(|c| c.policy)
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Create a thread: allocates the control block and stack, enqueues it
    /// Ready, and preempts the caller if the newcomer outranks it.
    ///
    /// In MLFQS mode the priority argument is ignored; the formula decides
    /// from the fresh thread's zero recent_cpu and nice.
    pub fn create(
        &self,
        name: &str,
        priority: u8,
        entry: ThreadEntry,
        arg: usize,
    ) -> SchedulerResult<ThreadId> {
        if priority > PRI_MAX {
            return Err(SchedulerError::InvalidPriority {
                value: priority as i32,
                min: PRI_MIN as i32,
                max: PRI_MAX as i32,
            });
        }
        self.with_core(|c| {
            if c.threads.len() >= MAX_THREADS {
                return Err(SchedulerError::ThreadLimitReached {
                    current: c.threads.len(),
                    max: MAX_THREADS,
                });
            }
            let stack = Stack::new(DEFAULT_KERNEL_STACK_SIZE)?;
            let id = alloc_thread_id();

            // New threads start with nice 0 and no CPU history; under MLFQS
            // the formula decides the priority and the argument is ignored.
            let effective = match c.policy {
                SchedPolicy::Priority => priority,
                SchedPolicy::Mlfqs => mlfqs_priority(Fixed::ZERO, 0),
            };

            let t = Thread::new(id, name, effective, Some((entry, arg)), stack);
            c.threads.insert(id, t);
            c.stats.total_spawns += 1;
            log::debug!("create: '{}' tid={} priority={}", name, id, effective);

            c.ready_insert(id);
            c.check_preempt();
            Ok(id)
        })
    }

    /// Running -> Ready with immediate redispatch.
    pub fn yield_now(&self) {
        self.with_core(|c| {
            if c.current == c.idle {
                // Idle yields by simply re-running dispatch.
                let idle = c.idle;
                c.thread_mut(idle).state = ThreadState::Ready;
                c.schedule();
            } else {
                c.yield_current();
            }
        });
    }

    /// Running -> Dying; storage is reclaimed on the next dispatch away.
    /// In the kernel proper this never returns; the completion signal to the
    /// process layer is out of scope here and only logged.
    ///
    /// Locks still held at exit are released first. The TCB is about to be
    /// reclaimed, so a lingering holder reference would leave waiters stuck
    /// and point registry state at a thread that no longer exists.
    pub fn exit(&self) {
        self.with_core(|c| {
            let cur = c.current;
            sched_assert!(cur != c.idle, "idle thread cannot exit");
            log::debug!("exit: '{}' tid={}", c.current_thread().name(), cur);

            let held: Vec<LockId> = c.thread_mut(cur).held.drain(..).collect();
            if !held.is_empty() {
                log::warn!("thread {} exited holding {} lock(s); releasing", cur, held.len());
            }
            for id in held {
                c.lock_handoff(id);
            }

            c.thread_mut(cur).state = ThreadState::Dying;
            c.thread_mut(cur).queue = QueueLocation::Nowhere;
            c.schedule();
        });
    }

    /// Blocked -> Ready from the outside: removes the thread from whatever
    /// queue its tag names, revokes a pending lock donation if there was one,
    /// and re-evaluates preemption. Fatal if the thread is not Blocked.
    pub fn unblock(&self, tid: ThreadId) {
        self.with_core(|c| {
            {
                let t = c.thread(tid);
                sched_assert!(
                    t.state() == ThreadState::Blocked,
                    "unblock of non-Blocked thread {} ({})",
                    tid,
                    t.state()
                );
            }
            match c.thread(tid).queue {
                QueueLocation::Sleep => c.sleepers.retain(|&s| s != tid),
                QueueLocation::Semaphore(id) => {
                    if let Some(s) = c.semas.get_mut(&id) {
                        s.waiters.retain(|&w| w != tid);
                    }
                }
                QueueLocation::Lock(id) => {
                    if let Some(l) = c.locks.get_mut(&id) {
                        l.sema.waiters.retain(|&w| w != tid);
                    }
                    c.thread_mut(tid).waiting_on = None;
                    // The aborted wait may have been donating.
                    if c.policy == SchedPolicy::Priority {
                        if let Some(holder) = c.locks.get(&id).and_then(|l| l.holder) {
                            c.refresh_and_propagate(holder);
                        }
                    }
                }
                QueueLocation::Condvar(id) => {
                    if let Some(cv) = c.conds.get_mut(&id) {
                        cv.waiters.retain(|&w| w != tid);
                    }
                }
                QueueLocation::Nowhere | QueueLocation::Ready => {
                    sched_assert!(false, "blocked thread {} with queue {:?}", tid, c.thread(tid).queue);
                }
            }
            c.thread_mut(tid).queue = QueueLocation::Nowhere;
            c.unblock_inner(tid);
        });
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    /// Calling thread's handle.
    pub fn current(&self) -> ThreadId {
        self.with_core(|c| c.current_thread().id())
    }

    /// Calling thread's name.
    pub fn current_name(&self) -> String {
        self.with_core(|c| c.current_thread().name().into())
    }

    /// State of any live thread; None once reclaimed.
    pub fn thread_state(&self, tid: ThreadId) -> Option<ThreadState> {
        self.with_core(|c| c.threads.get(&tid).map(|t| t.state()))
    }

    /// Effective (dispatch) priority of any live thread.
    pub fn priority_of(&self, tid: ThreadId) -> Option<u8> {
        self.with_core(|c| c.threads.get(&tid).map(|t| t.effective_priority()))
    }

    /// Calling thread's effective priority.
    pub fn get_priority(&self) -> u8 {
        self.with_core(|c| c.current_thread().effective_priority())
    }

    /// Rewrite the calling thread's base priority and recompute its effective
    /// priority (which never drops below an outstanding donation), then
    /// re-evaluate preemption. No-op in MLFQS mode.
    pub fn set_priority(&self, priority: u8) {
        self.with_core(|c| {
            if c.policy == SchedPolicy::Mlfqs {
                log::debug!("set_priority ignored under MLFQS");
                return;
            }
            sched_assert!(
                priority <= PRI_MAX,
                "set_priority({}) outside [{}, {}]",
                priority,
                PRI_MIN,
                PRI_MAX
            );
            let cur = c.current_thread().id();
            c.thread_mut(cur).base_priority = priority;
            c.refresh_and_propagate(cur);
            c.check_preempt();
        });
    }

    /// Calling thread's nice value.
    pub fn get_nice(&self) -> i8 {
        self.with_core(|c| c.current_thread().nice())
    }

    /// Set the calling thread's nice value, recompute its priority and
    /// re-evaluate preemption. Meaningful only in MLFQS mode.
    pub fn set_nice(&self, nice: i8) {
        self.with_core(|c| {
            let nice = nice.clamp(NICE_MIN, NICE_MAX);
            let cur = c.current_thread().id();
            c.thread_mut(cur).nice = nice;
            if c.policy == SchedPolicy::Mlfqs {
                let (rc, n) = {
                    let t = c.thread(cur);
                    (t.recent_cpu, t.nice())
                };
                let pri = mlfqs_priority(rc, n);
                let t = c.thread_mut(cur);
                t.base_priority = pri;
                t.effective_priority = pri;
                c.check_preempt();
            }
        });
    }

    /// 100x the calling thread's recent_cpu, rounded to nearest.
    pub fn get_recent_cpu(&self) -> i32 {
        self.with_core(|c| (c.current_thread().recent_cpu * 100).to_int_nearest())
    }

    /// 100x the system load average, rounded to nearest.
    pub fn get_load_avg(&self) -> i32 {
        self.with_core(|c| (c.load_avg * 100).to_int_nearest())
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> SchedulerStats {
        self.with_core(|c| c.stats)
    }

    /// Dump statistics to the log.
    pub fn print_stats(&self) {
        let s = self.stats();
        log::info!(
            "scheduler: {} spawns, {} switches, {} idle ticks, {} kernel ticks",
            s.total_spawns,
            s.total_switches,
            s.idle_ticks,
            s.kernel_ticks
        );
    }

    // ── Timer interrupt ─────────────────────────────────────────────────────

    /// Called once per timer interrupt. Never blocks: advances the tick
    /// counter, runs the alarm wake scan, the MLFQS bookkeeping when enabled,
    /// and enforces the round-robin time slice.
    pub fn tick(&self) {
        self.with_core(|c| {
            c.ticks += 1;
            if c.current == c.idle {
                c.stats.idle_ticks += 1;
            } else {
                c.stats.kernel_ticks += 1;
            }

            if c.policy == SchedPolicy::Mlfqs {
                c.mlfqs_tick();
                let second = c.at_second_boundary();
                if second {
                    c.mlfqs_second();
                }
                if second || c.ticks % 4 == 0 {
                    c.mlfqs_recompute_priorities();
                    c.check_preempt();
                }
            }

            c.alarm_scan();

            c.slice_used += 1;
            if c.slice_used >= TIME_SLICE && c.current != c.idle {
                c.yield_current();
            }
        });
    }

    /// Current tick count.
    pub fn ticks(&self) -> i64 {
        self.with_core(|c| c.ticks)
    }
}
