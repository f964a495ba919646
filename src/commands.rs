//! Command surface exposed to the UI and storage layers.
//!
//! Commands arrive as tagged JSON over the app's IPC bridge and always get a
//! structured `CommandResponse` back; nothing here throws across the bridge.

use serde::{Deserialize, Serialize};

use crate::task::TaskDescriptor;

/// Scheduler and window commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum TaskCommand {
    StartScheduler,
    StopScheduler,
    AddScheduledTask { task: TaskDescriptor },
    /// Re-arm an edited task; recomputes its next fire time.
    UpdateScheduledTask { task: TaskDescriptor },
    RemoveScheduledTask { task_id: String },
    ExecuteTaskNow { task: TaskDescriptor },
    GetStatus,
    GetScheduledTasks,
    GetRunningTasks,
    IsInitialized,
    MarkInitialized,
    SetMaxConcurrent { value: usize },
    CloseTaskWindow { task_id: String },
}

/// Agent commands sent from a window, routed to that window's own agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AgentCommand {
    Run { prompt: String },
    Modify { task_id: String, prompt: String },
    Execute { task_id: String },
    Abort { task_id: String, reason: String },
    ListTasks,
}

/// Structured reply to any command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl CommandResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            data: None,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Success with a serialized payload. Serialization failure becomes an error reply.
    pub fn with_data<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                success: true,
                message: None,
                data: Some(value),
            },
            Err(e) => Self::error(format!("Failed to encode response: {e}")),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

impl<T: Serialize, E: std::fmt::Display> From<Result<T, E>> for CommandResponse {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Self::with_data(&data),
            Err(e) => Self::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_commands() {
        let cmd: TaskCommand =
            serde_json::from_str(r#"{"command":"remove_scheduled_task","task_id":"t1"}"#).unwrap();
        assert_eq!(
            cmd,
            TaskCommand::RemoveScheduledTask {
                task_id: "t1".into()
            }
        );

        let cmd: TaskCommand = serde_json::from_str(r#"{"command":"get_status"}"#).unwrap();
        assert_eq!(cmd, TaskCommand::GetStatus);
    }

    #[test]
    fn error_response_has_no_data() {
        let resp = CommandResponse::error("Scheduler not started");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Scheduler not started");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn from_result() {
        let ok: CommandResponse = Ok::<_, String>(3usize).into();
        assert!(ok.success);
        assert_eq!(ok.data, Some(serde_json::json!(3)));

        let err: CommandResponse = Err::<(), _>("boom").into();
        assert!(!err.success);
    }
}
