//! Execution context and the window close state machine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentService;
use crate::window::{TaskWindow, WindowHandle};

/// Close-lifecycle phase of an execution window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPhase {
    /// Window is open and accepting runs.
    Open,
    /// A close was requested during a run; waiting on the user.
    AwaitingChoice,
    /// Runs were aborted (or none were active) and the window is being destroyed.
    /// The slot is removed once the window reports it has closed.
    Closing,
}

impl WindowPhase {
    /// Check if this phase allows transitioning to another phase.
    pub fn can_transition_to(&self, target: WindowPhase) -> bool {
        use WindowPhase::*;

        matches!(
            (self, target),
            // From Open
            (Open, AwaitingChoice) | (Open, Closing) |
            // From AwaitingChoice
            (AwaitingChoice, Open) | (AwaitingChoice, Closing)
        )
    }
}

impl std::fmt::Display for WindowPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::AwaitingChoice => "awaiting_choice",
            Self::Closing => "closing",
        };
        write!(f, "{s}")
    }
}

/// One isolated execution surface: a window plus its own agent instance.
///
/// The mutable parts (current execution id, busy flag, phase) live in the
/// pool's slot for this context so they change under the pool lock.
pub struct ExecutionContext {
    pub task_id: String,
    pub window: Arc<dyn TaskWindow>,
    pub agent: Arc<dyn AgentService>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn new(
        task_id: impl Into<String>,
        window: Arc<dyn TaskWindow>,
        agent: Arc<dyn AgentService>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            window,
            agent,
            created_at: Utc::now(),
        }
    }

    pub fn handle(&self) -> WindowHandle {
        self.window.handle()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("task_id", &self.task_id)
            .field("handle", &self.handle())
            .field("created_at", &self.created_at)
            .finish()
    }
}
