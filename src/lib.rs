//! Task Windows: scheduled task execution core.
//!
//! Timers fire user-defined automation tasks into isolated execution windows,
//! each with its own agent instance, under a global concurrency cap.

pub mod agent;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod window;

pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use runtime::TaskRuntime;
pub use scheduler::Scheduler;
pub use window::{WindowPool, WindowRegistry};
