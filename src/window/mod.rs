//! Execution windows: the isolated surfaces scheduled tasks run in.
//!
//! - `context`: execution context and the close state machine phases
//! - `registry`: handle/task lookup used to route commands to a window's agent
//! - `pool`: per-task context ownership, reuse, and the concurrency cap

pub mod context;
pub mod pool;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::WindowError;
use crate::events::TaskEvent;

pub use context::{ExecutionContext, WindowPhase};
pub use pool::{WindowPool, WindowSnapshot};
pub use registry::WindowRegistry;

/// Opaque per-window caller handle.
pub type WindowHandle = u64;

/// Where an execution window points for a given run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRoute {
    pub task_id: String,
    pub execution_id: Uuid,
}

impl ExecutionRoute {
    pub fn new(task_id: impl Into<String>, execution_id: Uuid) -> Self {
        Self {
            task_id: task_id.into(),
            execution_id,
        }
    }

    /// In-app path the window loads to show this run.
    pub fn path(&self) -> String {
        format!(
            "/main?taskId={}&executionId={}&executionMode=true",
            self.task_id, self.execution_id
        )
    }
}

impl std::fmt::Display for ExecutionRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Lifecycle notifications a window sends to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    /// The user or the app asked to close the window. Nothing is closed yet.
    CloseRequested,
    /// The window is gone.
    Closed,
}

/// Answer to the close confirmation shown while a run is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseChoice {
    Cancel,
    StopAndClose,
}

/// Content of the close confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosePrompt {
    pub task_id: String,
    pub running_task_ids: Vec<String>,
}

impl ClosePrompt {
    pub fn message(&self) -> String {
        format!(
            "Task {} is still running ({} active run(s)). Stop it and close the window?",
            self.task_id,
            self.running_task_ids.len()
        )
    }
}

/// A native window hosting one execution context.
#[async_trait]
pub trait TaskWindow: Send + Sync {
    fn handle(&self) -> WindowHandle;

    /// Load the execution view for a run.
    async fn navigate(&self, route: &ExecutionRoute) -> Result<(), WindowError>;

    /// Bring the window to the front.
    fn focus(&self);

    /// Ask the window to close. The host answers with `WindowEvent::CloseRequested`.
    fn request_close(&self);

    /// Tear the window down without asking. The host answers with `WindowEvent::Closed`.
    fn destroy(&self);

    /// Push an event to the window's UI.
    fn send(&self, event: &TaskEvent);

    /// Show a blocking stop-or-keep dialog.
    async fn confirm_close(&self, prompt: &ClosePrompt) -> CloseChoice;
}

/// A newly provisioned window together with its lifecycle notifications.
pub struct OpenedWindow {
    pub window: Arc<dyn TaskWindow>,
    pub events: mpsc::UnboundedReceiver<WindowEvent>,
}

/// Provisions isolated execution windows.
pub trait WindowHost: Send + Sync {
    fn open_window(&self, task_id: &str) -> Result<OpenedWindow, WindowError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_path_carries_ids() {
        let execution_id = Uuid::new_v4();
        let route = ExecutionRoute::new("t1", execution_id);
        let path = route.path();
        assert!(path.starts_with("/main?taskId=t1&"));
        assert!(path.contains(&execution_id.to_string()));
        assert_eq!(route.to_string(), path);
    }

    #[test]
    fn close_prompt_message() {
        let prompt = ClosePrompt {
            task_id: "t1".into(),
            running_task_ids: vec!["a".into(), "b".into()],
        };
        assert!(prompt.message().contains("2 active run(s)"));
    }
}
