//! Counting semaphore
//!
//! The base blocking primitive. `down` consumes a unit or blocks; `up` hands
//! a unit directly to the best waiter if there is one, and only increments
//! the counter when nobody is waiting. The counter therefore never goes up
//! while a thread sits on the wait list.

use alloc::vec::Vec;

use crate::scheduler::thread::{QueueLocation, ThreadId};
use crate::scheduler::Scheduler;
use crate::sched_assert;
use crate::sync::SemaphoreId;

/// Registry entry for one semaphore.
pub struct SemaState {
    pub(crate) value: u32,
    pub(crate) waiters: Vec<ThreadId>,
}

impl Scheduler {
    /// Create a semaphore with the given initial value.
    pub fn sema_create(&self, initial: u32) -> SemaphoreId {
        self.with_core(|c| {
            let id = c.alloc_handle();
            c.semas.insert(
                id,
                SemaState {
                    value: initial,
                    waiters: Vec::new(),
                },
            );
            log::trace!("sema {} created, value {}", id, initial);
            id
        })
    }

    /// Decrement, blocking the caller until a unit is available.
    pub fn sema_down(&self, id: SemaphoreId) {
        self.with_core(|c| {
            sched_assert!(c.semas.contains_key(&id), "down on unknown semaphore {}", id);
            let cur = c.current_thread().id();
            let sema = c.semas.get_mut(&id).unwrap();
            if sema.value > 0 {
                sema.value -= 1;
                return;
            }
            sema.waiters.push(cur);
            c.thread_mut(cur).queue = QueueLocation::Semaphore(id);
            c.block_current();
        });
    }

    /// Decrement without blocking; true on success.
    pub fn sema_try_down(&self, id: SemaphoreId) -> bool {
        self.with_core(|c| {
            sched_assert!(c.semas.contains_key(&id), "down on unknown semaphore {}", id);
            let sema = c.semas.get_mut(&id).unwrap();
            if sema.value > 0 {
                sema.value -= 1;
                true
            } else {
                false
            }
        })
    }

    /// Increment, or hand the unit straight to the best waiter. Preemption is
    /// re-evaluated immediately, so upping a semaphore a higher-priority
    /// thread waits on costs the caller the CPU.
    pub fn sema_up(&self, id: SemaphoreId) {
        self.with_core(|c| {
            sched_assert!(c.semas.contains_key(&id), "up on unknown semaphore {}", id);
            let winner = {
                let waiters = &c.semas[&id].waiters;
                c.pick_highest(waiters)
            };
            match winner {
                Some(idx) => {
                    let tid = c.semas.get_mut(&id).unwrap().waiters.remove(idx);
                    c.thread_mut(tid).queue = QueueLocation::Nowhere;
                    c.unblock_inner(tid);
                }
                None => c.semas.get_mut(&id).unwrap().value += 1,
            }
        });
    }

    /// Current counter value (diagnostics).
    pub fn sema_value(&self, id: SemaphoreId) -> u32 {
        self.with_core(|c| {
            sched_assert!(c.semas.contains_key(&id), "unknown semaphore {}", id);
            c.semas[&id].value
        })
    }
}
