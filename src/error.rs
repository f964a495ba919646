//! Error types for the task execution core.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Scheduling failures, reported to the caller as values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler not started")]
    NotStarted,

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is not running")]
    NotRunning,

    #[error("Invalid task descriptor: {reason}")]
    InvalidTask { reason: String },

    #[error("Task {task_id} has an invalid schedule: {reason}")]
    InvalidSchedule { task_id: String, reason: String },

    #[error("Task {task_id} uses a cron schedule, which is not supported")]
    CronUnsupported { task_id: String },

    #[error("Task {task_id} computed a fire time in the past")]
    PastFireTime { task_id: String },

    #[error("No scheduled timer for task {task_id}")]
    NotFound { task_id: String },
}

/// Execution window pool errors.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Maximum concurrent task windows ({max}) reached")]
    AtCapacity { max: usize },

    #[error("Max concurrent must be between {min} and {max}, got {value}")]
    InvalidMaxConcurrent { value: usize, min: usize, max: usize },

    #[error("Task window for {task_id} is closing")]
    WindowClosing { task_id: String },

    #[error("No execution context for task {task_id}")]
    ContextNotFound { task_id: String },

    #[error("Failed to provision window for task {task_id}: {source}")]
    Provision {
        task_id: String,
        #[source]
        source: WindowError,
    },
}

/// Failures reported by an agent service adapter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("Agent task {task_id} not found")]
    TaskNotFound { task_id: String },

    #[error("Agent run aborted: {reason}")]
    Aborted { reason: String },

    #[error("Agent run failed: {0}")]
    ExecutionFailed(String),
}

/// Window host / window handle failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WindowError {
    #[error("Window creation failed: {0}")]
    CreationFailed(String),

    #[error("No window registered for handle {handle}")]
    UnknownHandle { handle: u64 },
}

/// Persisted task source errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed task store: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    /// Whether this failure is the result of a cooperative abort.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
