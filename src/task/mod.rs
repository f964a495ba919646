//! Task model: descriptors, schedules, and the records the scheduler keeps.

pub mod model;

pub use model::{
    IntervalUnit, QueuedTask, RunningTaskRecord, Schedule, TaskDescriptor, TaskStep,
    compose_prompt,
};
