//! Alarm clock
//!
//! `sleep(n)` blocks the caller until the global tick counter has advanced by
//! at least `n`. No busy waiting: sleepers go on a queue ordered by wakeup
//! tick and the per-tick scan only looks at the front. Ties keep insertion
//! order, so threads that asked first wake first and preemption then sorts
//! out who actually runs.

use crate::scheduler::thread::QueueLocation;
use crate::scheduler::core::scheduler::Core;
use crate::scheduler::Scheduler;
use crate::sched_assert;

impl Core {
    /// Insert the current thread into the sleep queue, keeping it sorted by
    /// wakeup tick. Insertion after all earlier-or-equal entries preserves
    /// FIFO order among identical deadlines.
    pub(crate) fn alarm_insert(&mut self, wakeup: i64) {
        let cur = self.current_thread().id();
        {
            let t = self.thread_mut(cur);
            t.wakeup_tick = wakeup;
            t.queue = QueueLocation::Sleep;
        }
        let pos = self
            .sleepers
            .iter()
            .position(|&s| self.thread(s).wakeup_tick > wakeup)
            .unwrap_or(self.sleepers.len());
        self.sleepers.insert(pos, cur);
    }

    /// Wake every sleeper whose deadline has arrived. Runs on each tick; the
    /// queue is sorted, so this stops at the first pending deadline.
    pub(crate) fn alarm_scan(&mut self) {
        while let Some(&front) = self.sleepers.first() {
            if self.thread(front).wakeup_tick > self.ticks {
                break;
            }
            self.sleepers.remove(0);
            self.thread_mut(front).queue = QueueLocation::Nowhere;
            log::trace!("alarm: waking {} at tick {}", front, self.ticks);
            self.unblock_inner(front);
        }
    }
}

impl Scheduler {
    /// Block the calling thread for at least `ticks` timer ticks. Zero or
    /// negative durations return immediately without yielding.
    pub fn sleep(&self, ticks: i64) {
        self.with_core(|c| {
            if ticks <= 0 {
                return;
            }
            let cur = c.current_thread().id();
            sched_assert!(cur != c.idle, "idle thread cannot sleep");
            let wakeup = c.ticks + ticks;
            c.alarm_insert(wakeup);
            c.block_current();
        });
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;
    use proptest::prelude::*;

    use crate::scheduler::{SchedPolicy, Scheduler, ThreadId, ThreadState};

    fn noop(_: usize) {}

    #[test]
    fn sleep_zero_or_negative_returns_immediately() {
        let s = Scheduler::new(SchedPolicy::Priority);
        let main = s.current();
        s.sleep(0);
        s.sleep(-5);
        assert_eq!(s.current(), main);
        assert_eq!(s.thread_state(main), Some(ThreadState::Running));
    }

    #[test]
    fn sleeper_wakes_no_earlier_than_its_deadline() {
        let s = Scheduler::new(SchedPolicy::Priority);
        let main = s.current();
        s.create("spin", 10, noop, 0).unwrap();
        s.sleep(5);
        // The low-priority thread runs while main sleeps.
        assert_eq!(s.current_name(), "spin");
        for _ in 0..4 {
            s.tick();
            assert_eq!(s.thread_state(main), Some(ThreadState::Blocked));
        }
        s.tick();
        assert_eq!(s.thread_state(main), Some(ThreadState::Running));
        assert_eq!(s.current(), main);
    }

    #[test]
    fn staggered_sleepers_wake_in_deadline_order() {
        let s = Scheduler::new(SchedPolicy::Priority);
        let main = s.current();

        // Each helper outranks main, runs immediately, and goes to sleep.
        let t10 = s.create("t10", 40, noop, 0).unwrap();
        s.sleep(10);
        let t20 = s.create("t20", 40, noop, 0).unwrap();
        s.sleep(20);
        let t5 = s.create("t5", 40, noop, 0).unwrap();
        s.sleep(5);
        assert_eq!(s.current(), main);

        let mut order: Vec<ThreadId> = Vec::new();
        for _ in 0..25 {
            s.tick();
            while s.current() != main {
                order.push(s.current());
                s.exit();
            }
        }
        assert_eq!(order, [t5, t10, t20]);
    }

    #[test]
    fn simultaneous_deadlines_all_wake_on_the_same_tick() {
        let s = Scheduler::new(SchedPolicy::Priority);
        let main = s.current();
        let a = s.create("a", 40, noop, 0).unwrap();
        s.sleep(3);
        let b = s.create("b", 40, noop, 0).unwrap();
        s.sleep(3);
        assert_eq!(s.current(), main);

        s.tick();
        s.tick();
        assert_eq!(s.thread_state(a), Some(ThreadState::Blocked));
        s.tick();
        // Both due; the first to sleep runs first, the other is Ready.
        assert_eq!(s.current(), a);
        assert_eq!(s.thread_state(b), Some(ThreadState::Ready));
    }

    proptest! {
        /// Whatever mix of durations threads ask for, they resume in
        /// deadline order (ties broken by who slept first).
        #[test]
        fn wake_order_matches_deadline_order(durations in prop::collection::vec(1i64..50, 1..8)) {
            let s = Scheduler::new(SchedPolicy::Priority);
            let main = s.current();

            let mut expected: Vec<(i64, ThreadId)> = Vec::new();
            for &d in &durations {
                let tid = s.create("sleeper", 40, noop, 0).unwrap();
                // The new thread preempts main and is the one that sleeps.
                prop_assert_eq!(s.current(), tid);
                s.sleep(d);
                prop_assert_eq!(s.current(), main);
                expected.push((d, tid));
            }
            expected.sort_by_key(|&(d, _)| d); // stable: ties keep sleep order

            let mut woke: Vec<ThreadId> = Vec::new();
            for _ in 0..60 {
                s.tick();
                while s.current() != main {
                    woke.push(s.current());
                    s.exit();
                }
            }
            let expected: Vec<ThreadId> = expected.into_iter().map(|(_, tid)| tid).collect();
            prop_assert_eq!(woke, expected);
        }
    }
}
