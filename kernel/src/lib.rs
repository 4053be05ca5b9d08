// src/lib.rs
// Cinder-OS kernel library entry point.
//
// The scheduler core is architecture-independent: the register-level context
// switch, interrupt vectors and paging live in the (separate) platform layer.
// Building with std under `cargo test` exercises the same code the
// freestanding image links.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod scheduler;
pub mod sync;
pub mod time;

pub use scheduler::{SchedPolicy, Scheduler, SchedulerError, SchedulerResult, ThreadId};
pub use scheduler::{PRI_DEFAULT, PRI_MAX, PRI_MIN};
pub use sync::{CondvarId, LockId, SemaphoreId};
