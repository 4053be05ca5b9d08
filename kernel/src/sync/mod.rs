//! Synchronization primitives
//!
//! Semaphores, locks and condition variables, all with priority-ordered
//! wakeup. State lives in registries inside the scheduler core and is
//! addressed by handle; the handles are plain ids so they can be embedded in
//! queue tags and shared freely between threads.
//!
//! All three primitives hand off directly to the chosen waiter instead of
//! bumping a counter and letting woken threads race: the waiter with the
//! highest effective priority at wake time gets the resource, FIFO among
//! equals.

pub mod condvar;
pub mod lock;
pub mod semaphore;

pub use condvar::CondState;
pub use lock::LockState;
pub use semaphore::SemaState;

/// Semaphore handle.
pub type SemaphoreId = u64;
/// Lock handle.
pub type LockId = u64;
/// Condition variable handle.
pub type CondvarId = u64;
