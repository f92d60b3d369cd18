//! Concurrency scheduler.
//!
//! Admission control over the registry: on every submission and every release,
//! promote waiting jobs while both the transfer budget and the busy budget allow.

mod admission;
mod limits;

pub use admission::Scheduler;
pub use limits::{ConcurrencyLimits, SlotUsage};
