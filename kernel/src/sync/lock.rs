//! Mutual-exclusion lock
//!
//! A binary semaphore with an owner, which is what makes priority donation
//! possible: the waiters of a held lock know exactly who to boost. Release
//! hands the lock directly to the highest-effective-priority waiter, so
//! ownership never passes through a free state while anyone is queued.
//!
//! Contract violations (reentrant acquire, releasing a lock the caller does
//! not hold) are fatal, matching the rest of the core.

use alloc::vec::Vec;

use crate::scheduler::core::scheduler::{Core, SchedPolicy};
use crate::scheduler::thread::{QueueLocation, ThreadId};
use crate::scheduler::Scheduler;
use crate::sched_assert;
use crate::sync::semaphore::SemaState;
use crate::sync::LockId;

/// Registry entry for one lock: the underlying binary semaphore plus the
/// holder, tracked for donation and for the held-by assertions.
pub struct LockState {
    pub(crate) holder: Option<ThreadId>,
    pub(crate) sema: SemaState,
}

impl Core {
    /// Pass a released lock on: directly to the best waiter if there is one,
    /// otherwise back to the free state. The woken thread is made Ready but
    /// preemption is left to the caller, so release and condvar wait can
    /// sequence it differently.
    pub(crate) fn lock_handoff(&mut self, id: LockId) {
        let winner = {
            let waiters = &self.locks[&id].sema.waiters;
            self.pick_highest(waiters)
        };
        match winner {
            Some(idx) => {
                let tid = self.locks.get_mut(&id).unwrap().sema.waiters.remove(idx);
                {
                    let t = self.thread_mut(tid);
                    t.queue = QueueLocation::Nowhere;
                    t.waiting_on = None;
                    t.held.push(id);
                }
                self.locks.get_mut(&id).unwrap().holder = Some(tid);
                // Remaining waiters now donate to the new holder.
                self.refresh_and_propagate(tid);
                self.unblock_no_preempt(tid);
                log::trace!("lock {} handed to {}", id, tid);
            }
            None => {
                let l = self.locks.get_mut(&id).unwrap();
                l.holder = None;
                l.sema.value = 1;
            }
        }
    }
}

impl Scheduler {
    /// Create an unheld lock.
    pub fn lock_create(&self) -> LockId {
        self.with_core(|c| {
            let id = c.alloc_handle();
            c.locks.insert(
                id,
                LockState {
                    holder: None,
                    sema: SemaState {
                        value: 1,
                        waiters: Vec::new(),
                    },
                },
            );
            id
        })
    }

    /// Acquire the lock, blocking until it is free. While blocked, the caller
    /// donates its effective priority along the lock's wait chain (priority
    /// policy only). Reentrant acquisition is fatal.
    pub fn lock_acquire(&self, id: LockId) {
        self.with_core(|c| {
            sched_assert!(c.locks.contains_key(&id), "acquire on unknown lock {}", id);
            let cur = c.current_thread().id();
            let holder = c.locks[&id].holder;
            sched_assert!(
                holder != Some(cur),
                "thread {} re-acquiring lock {} it already holds",
                cur,
                id
            );

            if c.locks[&id].sema.value > 0 {
                let l = c.locks.get_mut(&id).unwrap();
                l.sema.value = 0;
                l.holder = Some(cur);
                c.thread_mut(cur).held.push(id);
                return;
            }

            sched_assert!(holder.is_some(), "contended lock {} with no holder", id);
            c.locks.get_mut(&id).unwrap().sema.waiters.push(cur);
            {
                let t = c.thread_mut(cur);
                t.queue = QueueLocation::Lock(id);
                t.waiting_on = Some(id);
            }
            if c.policy == SchedPolicy::Priority {
                if let Some(h) = holder {
                    c.refresh_and_propagate(h);
                }
            }
            c.block_current();
            // When this thread runs again the handoff has already made it
            // the holder.
        });
    }

    /// Acquire without blocking; true on success.
    pub fn lock_try_acquire(&self, id: LockId) -> bool {
        self.with_core(|c| {
            sched_assert!(c.locks.contains_key(&id), "acquire on unknown lock {}", id);
            let cur = c.current_thread().id();
            sched_assert!(
                c.locks[&id].holder != Some(cur),
                "thread {} re-acquiring lock {} it already holds",
                cur,
                id
            );
            if c.locks[&id].sema.value > 0 {
                let l = c.locks.get_mut(&id).unwrap();
                l.sema.value = 0;
                l.holder = Some(cur);
                c.thread_mut(cur).held.push(id);
                true
            } else {
                false
            }
        })
    }

    /// Release the lock. Donations received through this lock are revoked
    /// before the handoff, so the caller drops back to whatever its other
    /// held locks and base priority justify, then loses the CPU if the woken
    /// waiter (or anyone ready) now outranks it.
    pub fn lock_release(&self, id: LockId) {
        self.with_core(|c| {
            sched_assert!(c.locks.contains_key(&id), "release on unknown lock {}", id);
            let cur = c.current_thread().id();
            sched_assert!(
                c.locks[&id].holder == Some(cur),
                "thread {} releasing lock {} it does not hold",
                cur,
                id
            );
            c.thread_mut(cur).held.retain(|&l| l != id);
            c.refresh_and_propagate(cur);
            c.lock_handoff(id);
            c.check_preempt();
        });
    }

    /// Does the calling thread hold this lock?
    pub fn lock_held_by_current(&self, id: LockId) -> bool {
        self.with_core(|c| {
            sched_assert!(c.locks.contains_key(&id), "unknown lock {}", id);
            c.locks[&id].holder == Some(c.current_thread().id())
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::scheduler::{SchedPolicy, Scheduler, ThreadState};

    fn noop(_: usize) {}

    #[test]
    fn uncontended_acquire_release() {
        let s = Scheduler::new(SchedPolicy::Priority);
        let lock = s.lock_create();
        assert!(!s.lock_held_by_current(lock));
        s.lock_acquire(lock);
        assert!(s.lock_held_by_current(lock));
        s.lock_release(lock);
        assert!(!s.lock_held_by_current(lock));
    }

    #[test]
    fn contended_release_hands_to_best_waiter() {
        let s = Scheduler::new(SchedPolicy::Priority);
        let main = s.current();
        let lock = s.lock_create();
        s.lock_acquire(lock);

        let lo = s.create("lo", 40, noop, 0).unwrap();
        s.lock_acquire(lock); // lo blocks
        let hi = s.create("hi", 50, noop, 0).unwrap();
        s.lock_acquire(lock); // hi blocks
        assert_eq!(s.current(), main);

        s.lock_release(lock);
        assert_eq!(s.current(), hi);
        assert!(s.lock_held_by_current(lock));
        assert_eq!(s.thread_state(lo), Some(ThreadState::Blocked));
    }

    #[test]
    fn try_acquire_fails_on_held_lock() {
        let s = Scheduler::new(SchedPolicy::Priority);
        let lock = s.lock_create();
        s.lock_acquire(lock);
        let t = s.create("t", 50, noop, 0).unwrap();
        assert_eq!(s.current(), t);
        assert!(!s.lock_try_acquire(lock));
        // Still running: try never blocks.
        assert_eq!(s.current(), t);
        let free = s.lock_create();
        assert!(s.lock_try_acquire(free));
        assert!(s.lock_held_by_current(free));
    }

    #[test]
    #[should_panic(expected = "re-acquiring")]
    fn reentrant_acquire_is_fatal() {
        let s = Scheduler::new(SchedPolicy::Priority);
        let lock = s.lock_create();
        s.lock_acquire(lock);
        s.lock_acquire(lock);
    }

    #[test]
    #[should_panic(expected = "does not hold")]
    fn releasing_an_unheld_lock_is_fatal() {
        let s = Scheduler::new(SchedPolicy::Priority);
        let lock = s.lock_create();
        s.lock_release(lock);
    }
}
