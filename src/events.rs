//! Task events pushed to execution windows and fanned out to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::agent::AgentEvent;
use crate::task::TaskStep;
use crate::window::TaskWindow;

/// Terminal status of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Failed,
    Aborted,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

/// Events delivered to a window's UI.
///
/// The `type` tag matches the channel names the UI listens on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TaskEvent {
    /// A run started in its execution window.
    #[serde(rename_all = "camelCase")]
    TaskExecutionStart {
        task_id: String,
        task_name: String,
        execution_id: Uuid,
        steps: Vec<TaskStep>,
    },
    /// A run settled, whatever the outcome.
    #[serde(rename_all = "camelCase")]
    TaskExecutionComplete {
        task_id: String,
        task_name: String,
        execution_id: Uuid,
        status: ExecutionStatus,
        end_time: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A run was aborted because its window was force-closed.
    #[serde(rename_all = "camelCase")]
    TaskAbortedBySystem {
        task_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// Intermediate agent output for the window's task.
    #[serde(rename_all = "camelCase")]
    AgentStream {
        task_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        execution_id: Option<Uuid>,
        event: AgentEvent,
    },
}

impl TaskEvent {
    /// The scheduled task this event belongs to.
    pub fn task_id(&self) -> &str {
        match self {
            Self::TaskExecutionStart { task_id, .. }
            | Self::TaskExecutionComplete { task_id, .. }
            | Self::TaskAbortedBySystem { task_id, .. }
            | Self::AgentStream { task_id, .. } => task_id,
        }
    }

    /// Channel name (matches the serde tag).
    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskExecutionStart { .. } => "task-execution-start",
            Self::TaskExecutionComplete { .. } => "task-execution-complete",
            Self::TaskAbortedBySystem { .. } => "task-aborted-by-system",
            Self::AgentStream { .. } => "agent-stream",
        }
    }
}

/// Deliver an event to its window and to every bus subscriber.
pub(crate) fn publish(
    window: &dyn TaskWindow,
    bus: &broadcast::Sender<TaskEvent>,
    event: TaskEvent,
) {
    window.send(&event);
    // No subscribers is fine
    let _ = bus.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_names_match_channels() {
        let event = TaskEvent::TaskAbortedBySystem {
            task_id: "t1".into(),
            reason: "window closed".into(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task-aborted-by-system");
        assert_eq!(json["taskId"], "t1");
        assert_eq!(event.name(), "task-aborted-by-system");
    }

    #[test]
    fn complete_event_omits_missing_error() {
        let event = TaskEvent::TaskExecutionComplete {
            task_id: "t1".into(),
            task_name: "Daily digest".into(),
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Completed,
            end_time: Utc::now(),
            error: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task-execution-complete");
        assert_eq!(json["status"], "completed");
        assert!(json.get("error").is_none());
        assert!(json.get("endTime").is_some());
    }
}
