//! Thread Control Block
//!
//! Everything the scheduler tracks per thread. The saved register context is
//! owned by the platform switch layer; the TCB only carries what the policy
//! code needs: lifecycle state, the two priorities, the MLFQS accounting
//! fields, and the queue/donation bookkeeping.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use super::stack::Stack;
use super::state::{QueueLocation, ThreadState};
use crate::scheduler::mlfqs::Fixed;
use crate::sync::LockId;

/// Thread ID type
pub type ThreadId = u64;

/// Thread entry function, invoked with its argument by the switch layer the
/// first time the thread is dispatched.
pub type ThreadEntry = fn(usize);

/// Lowest priority.
pub const PRI_MIN: u8 = 0;
/// Default priority.
pub const PRI_DEFAULT: u8 = 31;
/// Highest priority.
pub const PRI_MAX: u8 = 63;

/// Nice value bounds.
pub const NICE_MIN: i8 = -20;
pub const NICE_MAX: i8 = 20;

/// Canary stamped into every TCB and checked on each current-thread access.
/// A mismatch means something scribbled over the control block.
pub const THREAD_MAGIC: u32 = 0xC1D0_57AC;

static_assertions::const_assert!(PRI_MIN < PRI_DEFAULT);
static_assertions::const_assert!(PRI_DEFAULT < PRI_MAX);

/// Thread Control Block (TCB)
pub struct Thread {
    /// Unique thread ID
    id: ThreadId,

    /// Thread name (for debugging)
    name: Box<str>,

    /// Current state
    pub(crate) state: ThreadState,

    /// Which queue this thread sits on; must agree with `state`
    pub(crate) queue: QueueLocation,

    /// Priority as set by create/set_priority (never donated)
    pub(crate) base_priority: u8,

    /// Priority actually used for dispatch: base, a donation boost, or the
    /// MLFQS formula output
    pub(crate) effective_priority: u8,

    /// Niceness, MLFQS mode only
    pub(crate) nice: i8,

    /// Decayed CPU-usage estimate, MLFQS mode only (17.14 fixed point)
    pub(crate) recent_cpu: Fixed,

    /// Absolute tick to wake at; valid only while on the sleep queue
    pub(crate) wakeup_tick: i64,

    /// The lock this thread is blocked on, if any. A thread waits on at most
    /// one lock at a time, which is what keeps the donation graph a forest.
    pub(crate) waiting_on: Option<LockId>,

    /// Locks currently held. The waiters of these locks are exactly this
    /// thread's donor set.
    pub(crate) held: Vec<LockId>,

    /// Entry point and argument, consumed by the switch layer on first run.
    /// None for the boot thread, which is already executing.
    entry: Option<(ThreadEntry, usize)>,

    /// Kernel stack
    stack: Stack,

    /// Detects control-block corruption
    magic: u32,
}

impl Thread {
    /// Build a TCB. The caller (the scheduler core) enqueues it.
    pub(crate) fn new(
        id: ThreadId,
        name: &str,
        priority: u8,
        entry: Option<(ThreadEntry, usize)>,
        stack: Stack,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            state: ThreadState::Ready,
            queue: QueueLocation::Nowhere,
            base_priority: priority,
            effective_priority: priority,
            nice: 0,
            recent_cpu: Fixed::ZERO,
            wakeup_tick: 0,
            waiting_on: None,
            held: Vec::new(),
            entry,
            stack,
            magic: THREAD_MAGIC,
        }
    }

    /// Get thread ID
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Get thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get thread state
    pub fn state(&self) -> ThreadState {
        self.state
    }

    /// Priority used for dispatch decisions
    pub fn effective_priority(&self) -> u8 {
        self.effective_priority
    }

    /// Priority excluding donations
    pub fn base_priority(&self) -> u8 {
        self.base_priority
    }

    /// Get niceness
    pub fn nice(&self) -> i8 {
        self.nice
    }

    /// Entry point handed to the switch layer on first dispatch
    pub fn entry(&self) -> Option<(ThreadEntry, usize)> {
        self.entry
    }

    /// Stack top (initial stack pointer for the switch layer)
    pub fn stack_top(&self) -> usize {
        self.stack.top()
    }

    /// Canary check; the scheduler asserts this on every current-thread access
    pub fn magic_intact(&self) -> bool {
        self.magic == THREAD_MAGIC
    }
}

/// Global thread ID counter
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a new thread ID
pub fn alloc_thread_id() -> ThreadId {
    NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_thread_defaults() {
        let stack = Stack::new(4096).unwrap();
        let t = Thread::new(7, "worker", PRI_DEFAULT, None, stack);
        assert_eq!(t.id(), 7);
        assert_eq!(t.name(), "worker");
        assert_eq!(t.state(), ThreadState::Ready);
        assert_eq!(t.base_priority(), PRI_DEFAULT);
        assert_eq!(t.effective_priority(), PRI_DEFAULT);
        assert_eq!(t.nice(), 0);
        assert!(t.magic_intact());
    }

    #[test]
    fn ids_are_unique() {
        let a = alloc_thread_id();
        let b = alloc_thread_id();
        assert_ne!(a, b);
    }
}
