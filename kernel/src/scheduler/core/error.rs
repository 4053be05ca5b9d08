//! Scheduler Error Handling
//!
//! Recoverable errors are the ones `create()` can hit: resource exhaustion and
//! bad arguments. Everything else in this core (unblocking a non-Blocked
//! thread, reentrant lock acquisition, releasing an unheld lock) is a caller
//! bug, asserted fatally via `sched_assert!` rather than surfaced as a Result.

use core::fmt;

/// Scheduler error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    /// Maximum thread count reached
    ThreadLimitReached { current: usize, max: usize },

    /// Stack allocation failed
    StackAllocationFailed { size: usize },

    /// Priority outside [PRI_MIN, PRI_MAX]
    InvalidPriority { value: i32, min: i32, max: i32 },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThreadLimitReached { current, max } => {
                write!(f, "Thread limit reached: {}/{}", current, max)
            }
            Self::StackAllocationFailed { size } => {
                write!(f, "Stack allocation of {} bytes failed", size)
            }
            Self::InvalidPriority { value, min, max } => {
                write!(f, "Priority {} outside [{}, {}]", value, min, max)
            }
        }
    }
}

impl SchedulerError {
    /// Is this an allocation failure (as opposed to a bad argument)?
    pub fn is_allocation(&self) -> bool {
        matches!(
            self,
            Self::ThreadLimitReached { .. } | Self::StackAllocationFailed { .. }
        )
    }
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Macro for critical scheduler assertions. Contract violations indicate a
/// caller bug, not a runtime condition, so they halt rather than recover.
#[macro_export]
macro_rules! sched_assert {
    ($cond:expr, $($reason:tt)+) => {
        if !$cond {
            panic!("[SCHED] invariant violated: {}", format_args!($($reason)+));
        }
    };
}
