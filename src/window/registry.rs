//! Window context registry.
//!
//! Maps the opaque handle of every execution window to its context so an
//! inbound command from a window reaches that window's own agent instance.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::agent::AgentService;
use crate::window::{ExecutionContext, WindowHandle};

#[derive(Default)]
struct RegistryIndex {
    by_handle: HashMap<WindowHandle, Arc<ExecutionContext>>,
    by_task: HashMap<String, WindowHandle>,
}

/// Process-wide lookup from window handle (and task id) to execution context.
#[derive(Default)]
pub struct WindowRegistry {
    index: RwLock<RegistryIndex>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a context under its window handle and task id.
    ///
    /// A handle or task id that is already registered is overwritten.
    pub async fn register(&self, context: Arc<ExecutionContext>) {
        let handle = context.handle();
        let task_id = context.task_id.clone();
        let mut index = self.index.write().await;

        if let Some(previous) = index.by_handle.remove(&handle)
            && previous.task_id != task_id
            && index.by_task.get(&previous.task_id) == Some(&handle)
        {
            index.by_task.remove(&previous.task_id);
        }

        if let Some(previous_handle) = index.by_task.insert(task_id.clone(), handle)
            && previous_handle != handle
        {
            index.by_handle.remove(&previous_handle);
            tracing::warn!(
                task_id = %task_id,
                previous_handle,
                handle,
                "Task window re-registered under a new handle"
            );
        }

        index.by_handle.insert(handle, context);
        tracing::debug!(task_id = %task_id, handle, "Registered task window");
    }

    /// Remove a window. Returns its context if it was registered.
    pub async fn unregister(&self, handle: WindowHandle) -> Option<Arc<ExecutionContext>> {
        let mut index = self.index.write().await;
        let context = index.by_handle.remove(&handle)?;
        if index.by_task.get(&context.task_id) == Some(&handle) {
            index.by_task.remove(&context.task_id);
        }
        tracing::debug!(task_id = %context.task_id, handle, "Unregistered task window");
        Some(context)
    }

    pub async fn lookup_by_handle(&self, handle: WindowHandle) -> Option<Arc<ExecutionContext>> {
        self.index.read().await.by_handle.get(&handle).cloned()
    }

    pub async fn lookup_by_task_id(&self, task_id: &str) -> Option<Arc<ExecutionContext>> {
        let index = self.index.read().await;
        let handle = index.by_task.get(task_id)?;
        index.by_handle.get(handle).cloned()
    }

    pub async fn has_task_window(&self, task_id: &str) -> bool {
        self.index.read().await.by_task.contains_key(task_id)
    }

    /// The agent instance owned by the window behind `handle`.
    pub async fn agent_for(&self, handle: WindowHandle) -> Option<Arc<dyn AgentService>> {
        self.lookup_by_handle(handle)
            .await
            .map(|context| Arc::clone(&context.agent))
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.by_handle.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.read().await.by_handle.is_empty()
    }
}
