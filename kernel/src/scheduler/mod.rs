//! Thread scheduler
//!
//! Lifecycle state machine, strict-priority dispatch with donation, and the
//! boot-time-selectable MLFQS policy. The sleep queue lives in `time`, the
//! primitive wait lists in `sync`; both drive the state machine through the
//! core in this module.

pub mod core;
pub mod donation;
pub mod mlfqs;
pub mod thread;

pub use self::core::{
    SchedPolicy, Scheduler, SchedulerError, SchedulerResult, SchedulerStats, MAX_THREADS,
    TIME_SLICE,
};
pub use mlfqs::Fixed;
pub use thread::{
    ThreadEntry, ThreadId, ThreadState, NICE_MAX, NICE_MIN, PRI_DEFAULT, PRI_MAX, PRI_MIN,
};

use spin::Once;

/// The boot-time scheduler instance.
static SCHEDULER: Once<Scheduler> = Once::new();

/// Initialize the global scheduler with the given policy. The first call
/// wins; later calls return the existing instance.
pub fn init(policy: SchedPolicy) -> &'static Scheduler {
    SCHEDULER.call_once(|| Scheduler::new(policy))
}

/// The global scheduler. Fatal before `init`.
pub fn scheduler() -> &'static Scheduler {
    match SCHEDULER.get() {
        Some(s) => s,
        None => panic!("[SCHED] scheduler() before init()"),
    }
}

/// Timer-interrupt entry point for the global instance.
pub fn tick() {
    scheduler().tick()
}

/// Yield the CPU on the global instance.
pub fn yield_now() {
    scheduler().yield_now()
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test only: the global instance is process-wide state.
    #[test]
    fn init_is_idempotent_and_entry_points_work() {
        let first = init(SchedPolicy::Priority) as *const Scheduler;
        let again = init(SchedPolicy::Mlfqs) as *const Scheduler;
        assert_eq!(first, again);
        assert_eq!(scheduler().policy(), SchedPolicy::Priority);
        tick();
        yield_now();
        assert_eq!(scheduler().ticks(), 1);
    }
}
