//! Priority donation
//!
//! Under the strict-priority policy a lock holder runs at the maximum of its
//! own base priority and the effective priorities of every thread blocked on
//! a lock it holds. The boost follows the wait chain: if the holder is itself
//! blocked on another lock, that lock's holder inherits too. Each thread
//! waits on at most one lock at a time, so the chains form a forest and the
//! walk below terminates without a depth cap.
//!
//! Donations are not tracked as separate records; the effective priority is
//! recomputed from the wait lists whenever the inputs change (a new waiter,
//! a released lock, a set_priority call). That keeps revocation exact: when a
//! lock is released its waiters stop being donors by construction.

use super::core::scheduler::{Core, SchedPolicy};
use super::thread::ThreadId;

impl Core {
    /// Effective priority a thread should have right now: its base, or the
    /// best waiter on any lock it holds, whichever is higher.
    fn computed_effective(&self, tid: ThreadId) -> u8 {
        let t = self.thread(tid);
        let mut pri = t.base_priority();
        for &lock in &t.held {
            if let Some(l) = self.locks.get(&lock) {
                for &w in &l.sema.waiters {
                    pri = pri.max(self.thread(w).effective_priority());
                }
            }
        }
        pri
    }

    /// Recompute `tid`'s effective priority and push any change along its
    /// wait chain. No-op under MLFQS, where the formula owns priorities.
    pub(crate) fn refresh_and_propagate(&mut self, tid: ThreadId) {
        if self.policy == SchedPolicy::Mlfqs {
            return;
        }
        let mut cursor = tid;
        loop {
            let new_eff = self.computed_effective(cursor);
            let t = self.thread_mut(cursor);
            if t.effective_priority == new_eff {
                break;
            }
            t.effective_priority = new_eff;
            log::trace!("donation: thread {} effective now {}", cursor, new_eff);

            // If this thread is blocked on a lock, its holder's donor set
            // just changed value; keep walking.
            let next = match self.thread(cursor).waiting_on {
                Some(lock) => self.locks.get(&lock).and_then(|l| l.holder),
                None => None,
            };
            match next {
                Some(holder) => cursor = holder,
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::scheduler::{SchedPolicy, Scheduler, PRI_DEFAULT, PRI_MAX};

    fn noop(_: usize) {}

    #[test]
    fn waiter_boosts_holder_to_its_priority() {
        let s = Scheduler::new(SchedPolicy::Priority);
        let a = s.current();
        let lock = s.lock_create();
        s.lock_acquire(lock);

        let b = s.create("b", PRI_MAX, noop, 0).unwrap();
        assert_eq!(s.current(), b);
        s.lock_acquire(lock); // b blocks, donating to a

        assert_eq!(s.current(), a);
        assert_eq!(s.priority_of(a), Some(PRI_MAX));

        s.lock_release(lock);
        // Donation revoked, lock handed to b, b preempts.
        assert_eq!(s.priority_of(a), Some(PRI_DEFAULT));
        assert_eq!(s.current(), b);
        assert!(s.lock_held_by_current(lock));
    }

    #[test]
    fn donation_propagates_along_the_wait_chain() {
        let s = Scheduler::new(SchedPolicy::Priority);
        let main = s.current();
        let l1 = s.lock_create();
        let l2 = s.lock_create();
        s.lock_acquire(l1);

        let a = s.create("a", 40, noop, 0).unwrap();
        assert_eq!(s.current(), a);
        s.lock_acquire(l2);
        s.lock_acquire(l1); // a blocks on l1, donating 40 to main
        assert_eq!(s.current(), main);
        assert_eq!(s.priority_of(main), Some(40));

        let b = s.create("b", 50, noop, 0).unwrap();
        assert_eq!(s.current(), b);
        s.lock_acquire(l2); // b blocks on l2; the boost reaches main through a
        assert_eq!(s.current(), main);
        assert_eq!(s.priority_of(a), Some(50));
        assert_eq!(s.priority_of(main), Some(50));

        s.lock_release(l1);
        assert_eq!(s.priority_of(main), Some(crate::scheduler::PRI_DEFAULT));
        assert_eq!(s.current(), a);
        assert_eq!(s.priority_of(a), Some(50)); // still boosted by b via l2

        s.lock_release(l2);
        assert_eq!(s.priority_of(a), Some(40));
        assert_eq!(s.current(), b);
    }

    #[test]
    fn boosted_holder_outranks_a_middle_priority_thread() {
        let s = Scheduler::new(SchedPolicy::Priority);
        let main = s.current(); // base 31
        let lock = s.lock_create();
        s.lock_acquire(lock);

        let hi = s.create("hi", 63, noop, 0).unwrap();
        assert_eq!(s.current(), hi);
        s.lock_acquire(lock); // hi blocks on main's lock
        assert_eq!(s.current(), main);

        // A middle-priority thread must not cut ahead of the boosted holder.
        let mid = s.create("mid", 45, noop, 0).unwrap();
        assert_eq!(s.current(), main);
        s.yield_now();
        assert_eq!(s.current(), main);
        assert_eq!(s.thread_state(mid), Some(crate::scheduler::ThreadState::Ready));

        s.lock_release(lock);
        assert_eq!(s.current(), hi);
    }

    #[test]
    fn set_priority_cannot_undercut_a_donation() {
        let s = Scheduler::new(SchedPolicy::Priority);
        let main = s.current();
        let lock = s.lock_create();
        s.lock_acquire(lock);

        let hi = s.create("hi", 60, noop, 0).unwrap();
        assert_eq!(s.current(), hi);
        s.lock_acquire(lock);
        assert_eq!(s.current(), main);

        s.set_priority(5);
        // Base drops, but the donation keeps the effective priority up.
        assert_eq!(s.priority_of(main), Some(60));

        s.lock_release(lock);
        assert_eq!(s.current(), hi);
        assert_eq!(s.priority_of(main), Some(5));
    }

    #[test]
    fn donations_from_separate_locks_fall_back_stepwise() {
        let s = Scheduler::new(SchedPolicy::Priority);
        let main = s.current();
        let l1 = s.lock_create();
        let l2 = s.lock_create();
        s.lock_acquire(l1);
        s.lock_acquire(l2);

        let a = s.create("a", 40, noop, 0).unwrap();
        s.lock_acquire(l1);
        assert_eq!(s.current(), main);
        let b = s.create("b", 50, noop, 0).unwrap();
        s.lock_acquire(l2);
        assert_eq!(s.current(), main);
        assert_eq!(s.priority_of(main), Some(50));

        // Dropping l2 sheds b's donation but keeps a's.
        s.lock_release(l2);
        assert_eq!(s.current(), b);
        s.yield_now(); // b at 50 yields; main at 40 is next only after b
        assert_eq!(s.current(), b);
        s.exit(); // b done
        assert_eq!(s.current(), main);
        assert_eq!(s.priority_of(main), Some(40));

        s.lock_release(l1);
        assert_eq!(s.current(), a);
        assert_eq!(s.priority_of(main), Some(crate::scheduler::PRI_DEFAULT));
    }
}
