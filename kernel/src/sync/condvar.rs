//! Condition variable
//!
//! Mesa-style: wait atomically releases the associated lock and blocks;
//! signal moves the best waiter over to the lock's wait list rather than
//! making it Ready, because the signaler still holds the lock and the waiter
//! could only block on it again. The waiter becomes runnable when the lock is
//! handed to it, holding the lock, exactly as wait's contract promises.
//!
//! Wait and signal both require the caller to hold the lock; violating that
//! is fatal.

use alloc::vec::Vec;

use crate::scheduler::thread::{QueueLocation, ThreadId, ThreadState};
use crate::scheduler::Scheduler;
use crate::sched_assert;
use crate::sync::{CondvarId, LockId};

/// Registry entry for one condition variable.
pub struct CondState {
    pub(crate) waiters: Vec<ThreadId>,
}

impl Scheduler {
    /// Create a condition variable.
    pub fn cond_create(&self) -> CondvarId {
        self.with_core(|c| {
            let id = c.alloc_handle();
            c.conds.insert(id, CondState { waiters: Vec::new() });
            id
        })
    }

    /// Release `lock` and block on `cond` in one step, so no signal can slip
    /// between the two. On return the caller holds `lock` again.
    pub fn cond_wait(&self, cond: CondvarId, lock: LockId) {
        self.with_core(|c| {
            sched_assert!(c.conds.contains_key(&cond), "wait on unknown condvar {}", cond);
            sched_assert!(c.locks.contains_key(&lock), "wait with unknown lock {}", lock);
            let cur = c.current_thread().id();
            sched_assert!(
                c.locks[&lock].holder == Some(cur),
                "thread {} waiting on condvar {} without holding lock {}",
                cur,
                cond,
                lock
            );

            // Donations received through the lock end here.
            c.thread_mut(cur).held.retain(|&l| l != lock);
            c.refresh_and_propagate(cur);

            // Park on the condvar before the handoff so release and block
            // are one critical section.
            c.conds.get_mut(&cond).unwrap().waiters.push(cur);
            {
                let t = c.thread_mut(cur);
                t.queue = QueueLocation::Condvar(cond);
                t.state = ThreadState::Blocked;
            }
            c.lock_handoff(lock);
            c.schedule();
        });
    }

    /// Wake the highest-priority waiter, if any. The caller must hold the
    /// lock, so the waiter is moved onto the lock's wait list (donating to
    /// the caller) and runs once the lock reaches it.
    pub fn cond_signal(&self, cond: CondvarId, lock: LockId) {
        self.with_core(|c| {
            sched_assert!(c.conds.contains_key(&cond), "signal on unknown condvar {}", cond);
            sched_assert!(c.locks.contains_key(&lock), "signal with unknown lock {}", lock);
            let cur = c.current_thread().id();
            sched_assert!(
                c.locks[&lock].holder == Some(cur),
                "thread {} signaling condvar {} without holding lock {}",
                cur,
                cond,
                lock
            );
            let winner = {
                let waiters = &c.conds[&cond].waiters;
                c.pick_highest(waiters)
            };
            if let Some(idx) = winner {
                let tid = c.conds.get_mut(&cond).unwrap().waiters.remove(idx);
                c.requeue_on_lock(tid, lock);
            }
        });
    }

    /// Wake every waiter. Like signal, each moves to the lock's wait list;
    /// they acquire the lock one at a time in priority order as it is
    /// released.
    pub fn cond_broadcast(&self, cond: CondvarId, lock: LockId) {
        self.with_core(|c| {
            sched_assert!(c.conds.contains_key(&cond), "broadcast on unknown condvar {}", cond);
            sched_assert!(c.locks.contains_key(&lock), "broadcast with unknown lock {}", lock);
            let cur = c.current_thread().id();
            sched_assert!(
                c.locks[&lock].holder == Some(cur),
                "thread {} broadcasting condvar {} without holding lock {}",
                cur,
                cond,
                lock
            );
            loop {
                let winner = {
                    let waiters = &c.conds[&cond].waiters;
                    c.pick_highest(waiters)
                };
                let Some(idx) = winner else { break };
                let tid = c.conds.get_mut(&cond).unwrap().waiters.remove(idx);
                c.requeue_on_lock(tid, lock);
            }
        });
    }
}

impl crate::scheduler::core::scheduler::Core {
    /// Move a signaled (still Blocked) thread onto the lock's wait list and
    /// start it donating to the lock holder.
    pub(crate) fn requeue_on_lock(&mut self, tid: ThreadId, lock: LockId) {
        sched_assert!(
            self.thread(tid).state() == ThreadState::Blocked,
            "requeue of non-Blocked thread {}",
            tid
        );
        self.locks.get_mut(&lock).unwrap().sema.waiters.push(tid);
        {
            let t = self.thread_mut(tid);
            t.queue = QueueLocation::Lock(lock);
            t.waiting_on = Some(lock);
        }
        if let Some(holder) = self.locks[&lock].holder {
            self.refresh_and_propagate(holder);
        }
        log::trace!("condvar: thread {} requeued on lock {}", tid, lock);
    }
}

#[cfg(test)]
mod tests {
    use crate::scheduler::{SchedPolicy, Scheduler, ThreadState};

    fn noop(_: usize) {}

    #[test]
    fn wait_releases_the_lock_and_blocks() {
        let s = Scheduler::new(SchedPolicy::Priority);
        let main = s.current();
        let lock = s.lock_create();
        let cond = s.cond_create();

        let w = s.create("w", 50, noop, 0).unwrap();
        assert_eq!(s.current(), w);
        s.lock_acquire(lock);
        s.cond_wait(cond, lock);
        assert_eq!(s.thread_state(w), Some(ThreadState::Blocked));
        assert_eq!(s.current(), main);
        // The lock came free during the wait.
        s.lock_acquire(lock);
        assert!(s.lock_held_by_current(lock));
    }

    #[test]
    fn signal_moves_one_waiter_to_the_lock() {
        let s = Scheduler::new(SchedPolicy::Priority);
        let main = s.current();
        let lock = s.lock_create();
        let cond = s.cond_create();

        let w = s.create("w", 50, noop, 0).unwrap();
        s.lock_acquire(lock);
        s.cond_wait(cond, lock);
        assert_eq!(s.current(), main);

        s.lock_acquire(lock);
        s.cond_signal(cond, lock);
        // The waiter now waits for the lock and donates to us.
        assert_eq!(s.thread_state(w), Some(ThreadState::Blocked));
        assert_eq!(s.priority_of(main), Some(50));

        s.lock_release(lock);
        // Handoff completes the wait: w runs holding the lock.
        assert_eq!(s.current(), w);
        assert!(s.lock_held_by_current(lock));
    }

    #[test]
    fn signal_with_no_waiters_is_a_no_op() {
        let s = Scheduler::new(SchedPolicy::Priority);
        let main = s.current();
        let lock = s.lock_create();
        let cond = s.cond_create();
        s.lock_acquire(lock);
        s.cond_signal(cond, lock);
        s.cond_broadcast(cond, lock);
        assert_eq!(s.current(), main);
        s.lock_release(lock);
    }

    #[test]
    fn broadcast_wakes_in_priority_order() {
        let s = Scheduler::new(SchedPolicy::Priority);
        let main = s.current();
        let lock = s.lock_create();
        let cond = s.cond_create();

        let lo = s.create("lo", 40, noop, 0).unwrap();
        s.lock_acquire(lock);
        s.cond_wait(cond, lock);
        let hi = s.create("hi", 50, noop, 0).unwrap();
        s.lock_acquire(lock);
        s.cond_wait(cond, lock);
        assert_eq!(s.current(), main);

        s.lock_acquire(lock);
        s.cond_broadcast(cond, lock);
        s.lock_release(lock);
        // hi gets the lock first; lo follows once hi releases and exits.
        assert_eq!(s.current(), hi);
        s.lock_release(lock);
        assert_eq!(s.thread_state(lo), Some(ThreadState::Ready));
        s.exit();
        assert_eq!(s.current(), lo);
        assert!(s.lock_held_by_current(lock));
    }

    #[test]
    #[should_panic(expected = "without holding lock")]
    fn signal_without_the_lock_is_fatal() {
        let s = Scheduler::new(SchedPolicy::Priority);
        let lock = s.lock_create();
        let cond = s.cond_create();
        s.cond_signal(cond, lock);
    }
}
