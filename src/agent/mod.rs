//! Agent service seam.
//!
//! Each execution window owns one `AgentService` instance. The scheduler and
//! the window pool only depend on this contract; the agent framework behind
//! it (planning, tool calls, browser control) lives elsewhere.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::AgentError;

/// Intermediate events streamed by an agent while a run is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The model produced text.
    Message { task_id: String, text: String },
    /// A tool call started.
    ToolUse { task_id: String, tool_name: String },
    /// A tool call finished.
    ToolResult {
        task_id: String,
        tool_name: String,
        success: bool,
    },
    /// The run reached a terminal state.
    Finish { task_id: String },
    /// The run reported an error.
    Error { task_id: String, message: String },
}

impl AgentEvent {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Message { task_id, .. }
            | Self::ToolUse { task_id, .. }
            | Self::ToolResult { task_id, .. }
            | Self::Finish { task_id }
            | Self::Error { task_id, .. } => task_id,
        }
    }
}

/// Outcome of a run, modify, or execute call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunResult {
    pub task_id: String,
    pub success: bool,
    pub result: String,
}

/// Abort state of one agent task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTaskStatus {
    pub aborted: bool,
}

/// Per-window wrapper over the agent framework.
#[async_trait]
pub trait AgentService: Send + Sync {
    /// Plan and run a new task from a prompt.
    async fn run(&self, prompt: &str) -> Result<AgentRunResult, AgentError>;

    /// Replan an existing task with a new prompt.
    async fn modify(&self, task_id: &str, prompt: &str) -> Result<AgentRunResult, AgentError>;

    /// Execute an already planned task.
    async fn execute(&self, task_id: &str) -> Result<AgentRunResult, AgentError>;

    /// Request cooperative abortion of a task. Returns whether the task was known.
    async fn abort_task(&self, task_id: &str, reason: &str) -> Result<bool, AgentError>;

    /// Ids of every task this instance has seen.
    async fn all_task_ids(&self) -> Vec<String>;

    /// Abort state of a task, `None` if unknown.
    async fn task_status(&self, task_id: &str) -> Option<AgentTaskStatus>;

    /// Subscribe to intermediate events.
    fn subscribe(&self) -> broadcast::Receiver<AgentEvent>;
}

/// Creates a fresh, isolated agent instance for each new execution window.
pub trait AgentServiceFactory: Send + Sync {
    fn create(&self, task_id: &str) -> Arc<dyn AgentService>;
}

/// Ids of tasks that are known and not yet aborted.
pub async fn active_task_ids(agent: &dyn AgentService) -> Vec<String> {
    let mut active = Vec::new();
    for task_id in agent.all_task_ids().await {
        match agent.task_status(&task_id).await {
            Some(status) if !status.aborted => active.push(task_id),
            _ => {}
        }
    }
    active
}

/// Abort every active task on `agent`. Failures are logged, not returned.
///
/// Returns the ids that were successfully asked to abort.
pub async fn abort_all(agent: &dyn AgentService, reason: &str) -> Vec<String> {
    let mut aborted = Vec::new();
    for task_id in active_task_ids(agent).await {
        match agent.abort_task(&task_id, reason).await {
            Ok(true) => aborted.push(task_id),
            Ok(false) => {
                tracing::debug!(task_id = %task_id, "Agent task vanished before abort");
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "Failed to abort agent task");
            }
        }
    }
    aborted
}

/// The agent's events as a stream. Lagged receivers skip ahead.
pub fn event_stream(agent: &dyn AgentService) -> impl Stream<Item = AgentEvent> + Send + 'static {
    BroadcastStream::new(agent.subscribe()).filter_map(|item| async move {
        match item {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!(error = %e, "Agent event stream lagged");
                None
            }
        }
    })
}
