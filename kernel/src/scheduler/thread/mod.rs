//! Thread module - TCB, state machine, stacks

pub mod stack;
pub mod state;
#[allow(clippy::module_inception)]
pub mod thread;

pub use stack::{Stack, DEFAULT_KERNEL_STACK_SIZE};
pub use state::{location_matches_state, QueueLocation, ThreadState};
pub use thread::{
    alloc_thread_id, Thread, ThreadEntry, ThreadId, NICE_MAX, NICE_MIN, PRI_DEFAULT, PRI_MAX,
    PRI_MIN, THREAD_MAGIC,
};
