//! Core scheduler types: the dispatch engine and its error model.

pub mod error;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{SchedPolicy, Scheduler, SchedulerStats, MAX_THREADS, TIME_SLICE};
