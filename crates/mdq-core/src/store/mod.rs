//! Persistent state (SQLite via sqlx): the history of completed URLs and the
//! resume descriptors of every job not yet terminal.
//!
//! Resume writes are advisory: they go through `ResumeWriter`, which coalesces
//! them and only logs failures.

mod db;
mod history;
mod resume;
mod types;
mod writer;


pub use db::{unix_timestamp_ms, StateDb};
pub use types::{HistoryEntry, ResumeDescriptor};
pub use writer::ResumeWriter;
