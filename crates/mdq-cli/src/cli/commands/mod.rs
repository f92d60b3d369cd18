//! CLI command handlers. Each command is in its own file.

mod cancel;
mod discard;
mod get;
mod history;
mod pending;
mod resolve;
mod resume;

pub use cancel::run_cancel;
pub use discard::run_discard;
pub use get::run_get;
pub use history::run_history;
pub use pending::run_pending;
pub use resolve::run_resolve;
pub use resume::run_resume;

#[cfg(test)]
pub(crate) use get::job_config;
