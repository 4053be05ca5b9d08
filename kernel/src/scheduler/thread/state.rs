//! State - Thread state machine
//!
//! Manages thread lifecycle and the queue-membership tag that goes with it.

use core::fmt;

use crate::sync::{CondvarId, LockId, SemaphoreId};

/// Thread state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Thread is ready to run
    Ready,

    /// Thread is currently running
    Running,

    /// Thread is blocked (sleeping or waiting on a primitive)
    Blocked,

    /// Thread has exited; storage reclaimed on the next dispatch away from it
    Dying,
}

impl ThreadState {
    /// Check if state is active
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Ready)
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::Blocked => write!(f, "Blocked"),
            Self::Dying => write!(f, "Dying"),
        }
    }
}

/// Which queue a thread currently sits on.
///
/// Ready, sleep and wait-list membership are mutually exclusive; a single
/// shared link field would rely on that silently. A tagged location makes
/// the exclusivity checkable: a thread is on exactly the queue its tag
/// names, and the tag must agree with the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueLocation {
    /// Running, Dying, or the idle thread between dispatches
    Nowhere,
    /// On the ready queue
    Ready,
    /// On the sleep queue, waiting for its wakeup tick
    Sleep,
    /// On a semaphore's wait list
    Semaphore(SemaphoreId),
    /// On a lock's wait list
    Lock(LockId),
    /// On a condition variable's wait list
    Condvar(CondvarId),
}

impl QueueLocation {
    /// True if this location is one a Blocked thread may occupy.
    pub fn is_wait_list(self) -> bool {
        !matches!(self, Self::Nowhere | Self::Ready)
    }
}

/// Validate that a queue tag is consistent with a thread state.
pub fn location_matches_state(state: ThreadState, queue: QueueLocation) -> bool {
    match state {
        ThreadState::Running | ThreadState::Dying => queue == QueueLocation::Nowhere,
        // The idle thread is Ready but never enqueued; both tags are legal.
        ThreadState::Ready => matches!(queue, QueueLocation::Ready | QueueLocation::Nowhere),
        ThreadState::Blocked => queue.is_wait_list(),
    }
}
