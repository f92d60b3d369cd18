pub mod config;
pub mod logging;

pub mod adapter;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod events;
pub mod job;
pub mod paths;
pub mod pipeline;
pub mod reconcile;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod supervisor;
pub mod url_model;

pub use engine::{EngineHandle, EngineParts, SubmitRequest, SubmitResponse};
pub use error::{EngineError, Result};
pub use events::EngineEvent;
