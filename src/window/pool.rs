//! Execution window pool.
//!
//! Owns one execution context per task id. Contexts are created lazily,
//! reused when the same task is dispatched again, and destroyed only when
//! their window reports it has closed.
//!
//! A slot counts against `max_concurrent` while a run is in flight in it,
//! not for as long as its window exists. Idle windows stay open (the user can
//! review the last run) and are reused by the next dispatch of the same task,
//! so at most one window exists per distinct task id. They are only removed
//! through `close_task_window`, `close_all_task_windows`, or the user closing
//! them; reusing an idle window still needs a free slot.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::agent::{self, AgentServiceFactory};
use crate::config::{MAX_CONCURRENT, MIN_CONCURRENT, RuntimeConfig, validate_max_concurrent};
use crate::error::PoolError;
use crate::events::{self, TaskEvent};
use crate::window::{
    ClosePrompt, CloseChoice, ExecutionContext, ExecutionRoute, OpenedWindow, WindowEvent,
    WindowHandle, WindowHost, WindowPhase, WindowRegistry,
};

/// Reason given to the agent when a reused window drops its previous run.
const SUPERSEDED_REASON: &str = "Superseded by a new execution of the same task";
/// Reason given to the agent when the user stops a run by closing its window.
const WINDOW_CLOSED_REASON: &str = "Task window closed by user";

/// Mutable bookkeeping for one context.
struct ContextSlot {
    context: Arc<ExecutionContext>,
    execution_id: Uuid,
    busy: bool,
    phase: WindowPhase,
}

type Slots = Arc<RwLock<HashMap<String, ContextSlot>>>;

/// Callback run with the task id after a window's context is torn down.
type TeardownHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Point-in-time view of one execution window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSnapshot {
    pub task_id: String,
    pub execution_id: Uuid,
    pub handle: WindowHandle,
    pub busy: bool,
    pub phase: WindowPhase,
    pub created_at: DateTime<Utc>,
}

/// Bounded pool of isolated execution windows.
pub struct WindowPool {
    host: Arc<dyn WindowHost>,
    agents: Arc<dyn AgentServiceFactory>,
    registry: Arc<WindowRegistry>,
    events: broadcast::Sender<TaskEvent>,
    slots: Slots,
    max_concurrent: AtomicUsize,
    close_grace_period: Duration,
    on_teardown: Arc<OnceLock<TeardownHook>>,
}

impl WindowPool {
    pub fn new(
        config: &RuntimeConfig,
        host: Arc<dyn WindowHost>,
        agents: Arc<dyn AgentServiceFactory>,
        registry: Arc<WindowRegistry>,
        events: broadcast::Sender<TaskEvent>,
    ) -> Self {
        let max_concurrent = if validate_max_concurrent(config.max_concurrent) {
            config.max_concurrent
        } else {
            tracing::warn!(
                "max_concurrent {} outside {}..={}, using {}",
                config.max_concurrent,
                MIN_CONCURRENT,
                MAX_CONCURRENT,
                RuntimeConfig::default().max_concurrent
            );
            RuntimeConfig::default().max_concurrent
        };

        Self {
            host,
            agents,
            registry,
            events,
            slots: Arc::new(RwLock::new(HashMap::new())),
            max_concurrent: AtomicUsize::new(max_concurrent),
            close_grace_period: config.close_grace_period,
            on_teardown: Arc::new(OnceLock::new()),
        }
    }

    /// Install the callback run after each teardown. Only the first one sticks.
    pub fn on_teardown(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        if self.on_teardown.set(Arc::new(hook)).is_err() {
            tracing::warn!("Teardown hook already installed; ignoring");
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::Relaxed)
    }

    /// Change the concurrency bound. Values outside `[1, 5]` are rejected.
    pub fn set_max_concurrent(&self, value: usize) -> Result<(), PoolError> {
        if !validate_max_concurrent(value) {
            return Err(PoolError::InvalidMaxConcurrent {
                value,
                min: MIN_CONCURRENT,
                max: MAX_CONCURRENT,
            });
        }
        let previous = self.max_concurrent.swap(value, Ordering::Relaxed);
        tracing::info!(previous, value, "Updated max concurrent task windows");
        Ok(())
    }

    /// Whether a dispatch for a task without a busy slot would be admitted.
    pub async fn can_run_new_task(&self) -> bool {
        occupied(&*self.slots.read().await) < self.max_concurrent()
    }

    /// Get (or create) the execution context for `task_id` and point it at a new run.
    pub async fn acquire_context(
        &self,
        task_id: &str,
        execution_id: Uuid,
    ) -> Result<Arc<ExecutionContext>, PoolError> {
        let (context, reused) = {
            let mut slots = self.slots.write().await;
            let max = self.max_concurrent();
            let busy = occupied(&slots);

            if let Some(slot) = slots.get_mut(task_id) {
                if slot.phase == WindowPhase::Closing {
                    return Err(PoolError::WindowClosing {
                        task_id: task_id.to_string(),
                    });
                }
                // An idle window takes a slot again; a busy one already holds its own
                if !slot.busy && busy >= max {
                    return Err(PoolError::AtCapacity { max });
                }
                slot.execution_id = execution_id;
                slot.busy = true;
                (Arc::clone(&slot.context), true)
            } else {
                if busy >= max {
                    return Err(PoolError::AtCapacity { max });
                }

                let context = self.provision(task_id)?;
                slots.insert(
                    task_id.to_string(),
                    ContextSlot {
                        context: Arc::clone(&context),
                        execution_id,
                        busy: true,
                        phase: WindowPhase::Open,
                    },
                );
                self.registry.register(Arc::clone(&context)).await;
                (context, false)
            }
        };

        if reused {
            let aborted = agent::abort_all(context.agent.as_ref(), SUPERSEDED_REASON).await;
            tracing::info!(
                task_id = %task_id,
                execution_id = %execution_id,
                aborted = aborted.len(),
                "Reusing task window"
            );
        } else {
            tracing::info!(
                task_id = %task_id,
                execution_id = %execution_id,
                handle = context.handle(),
                "Opened task window"
            );
        }

        let route = ExecutionRoute::new(task_id, execution_id);
        if let Err(e) = context.window.navigate(&route).await {
            tracing::warn!(task_id = %task_id, error = %e, "Failed to load execution view");
        }
        context.window.focus();

        Ok(context)
    }

    /// Mark the slot idle once the run identified by `execution_id` settles.
    ///
    /// Returns false when the context is gone or has moved on to a newer run.
    pub async fn release(&self, task_id: &str, execution_id: Uuid) -> bool {
        let mut slots = self.slots.write().await;
        match slots.get_mut(task_id) {
            Some(slot) if slot.execution_id == execution_id => {
                slot.busy = false;
                true
            }
            Some(_) => {
                tracing::debug!(
                    task_id = %task_id,
                    execution_id = %execution_id,
                    "Stale release ignored; window already serves a newer run"
                );
                false
            }
            None => {
                tracing::debug!(task_id = %task_id, "Release for a closed task window");
                false
            }
        }
    }

    /// Ask the window for `task_id` to close. Teardown follows its closed event.
    pub async fn close_task_window(&self, task_id: &str) -> bool {
        let window = self
            .slots
            .read()
            .await
            .get(task_id)
            .map(|slot| Arc::clone(&slot.context.window));

        match window {
            Some(window) => {
                window.request_close();
                true
            }
            None => {
                tracing::warn!(task_id = %task_id, "No task window to close");
                false
            }
        }
    }

    /// Ask every task window to close. Returns how many were asked.
    pub async fn close_all_task_windows(&self) -> usize {
        let windows: Vec<_> = self
            .slots
            .read()
            .await
            .values()
            .map(|slot| Arc::clone(&slot.context.window))
            .collect();

        for window in &windows {
            window.request_close();
        }
        windows.len()
    }

    /// Number of windows with a run in flight.
    pub async fn get_running_task_count(&self) -> usize {
        occupied(&*self.slots.read().await)
    }

    /// Windows with a run in flight.
    pub async fn get_running_tasks(&self) -> Vec<WindowSnapshot> {
        self.snapshots()
            .await
            .into_iter()
            .filter(|s| s.busy)
            .collect()
    }

    /// Every open execution window.
    pub async fn snapshots(&self) -> Vec<WindowSnapshot> {
        let slots = self.slots.read().await;
        let mut snapshots: Vec<WindowSnapshot> = slots
            .iter()
            .map(|(task_id, slot)| WindowSnapshot {
                task_id: task_id.clone(),
                execution_id: slot.execution_id,
                handle: slot.context.handle(),
                busy: slot.busy,
                phase: slot.phase,
                created_at: slot.context.created_at,
            })
            .collect();
        snapshots.sort_by_key(|s| s.created_at);
        snapshots
    }

    pub async fn window_count(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn has_context(&self, task_id: &str) -> bool {
        self.slots.read().await.contains_key(task_id)
    }

    /// Current execution id of the window for `task_id`.
    pub async fn execution_id(&self, task_id: &str) -> Option<Uuid> {
        self.slots.read().await.get(task_id).map(|s| s.execution_id)
    }

    pub async fn phase(&self, task_id: &str) -> Option<WindowPhase> {
        self.slots.read().await.get(task_id).map(|s| s.phase)
    }

    /// Open a window and agent for `task_id` and start its lifecycle task.
    fn provision(&self, task_id: &str) -> Result<Arc<ExecutionContext>, PoolError> {
        let OpenedWindow { window, events } =
            self.host
                .open_window(task_id)
                .map_err(|source| PoolError::Provision {
                    task_id: task_id.to_string(),
                    source,
                })?;

        let agent = self.agents.create(task_id);
        let context = Arc::new(ExecutionContext::new(task_id, window, agent));

        let lifecycle = Lifecycle {
            slots: Arc::clone(&self.slots),
            registry: Arc::clone(&self.registry),
            events: self.events.clone(),
            close_grace_period: self.close_grace_period,
            on_teardown: Arc::clone(&self.on_teardown),
        };
        tokio::spawn(lifecycle.run(Arc::clone(&context), events));

        Ok(context)
    }
}

fn occupied(slots: &HashMap<String, ContextSlot>) -> usize {
    slots.values().filter(|s| s.busy).count()
}

/// Shared state a window's lifecycle task needs.
struct Lifecycle {
    slots: Slots,
    registry: Arc<WindowRegistry>,
    events: broadcast::Sender<TaskEvent>,
    close_grace_period: Duration,
    on_teardown: Arc<OnceLock<TeardownHook>>,
}

impl Lifecycle {
    /// Drive the close state machine until the window reports it is gone.
    async fn run(
        self,
        context: Arc<ExecutionContext>,
        mut window_events: mpsc::UnboundedReceiver<WindowEvent>,
    ) {
        let forwarder = spawn_agent_forwarder(Arc::clone(&self.slots), &context);

        while let Some(event) = window_events.recv().await {
            match event {
                WindowEvent::CloseRequested => self.handle_close_request(&context).await,
                WindowEvent::Closed => break,
            }
        }

        forwarder.abort();
        self.teardown(&context).await;
    }

    async fn handle_close_request(&self, context: &Arc<ExecutionContext>) {
        match self.phase(context).await {
            Some(WindowPhase::Open) => {}
            Some(phase) => {
                tracing::debug!(
                    task_id = %context.task_id,
                    phase = %phase,
                    "Close already in progress"
                );
                return;
            }
            None => {
                tracing::warn!(task_id = %context.task_id, "Close request for unregistered window");
                return;
            }
        }

        let running = agent::active_task_ids(context.agent.as_ref()).await;
        if running.is_empty() {
            self.transition(context, WindowPhase::Closing).await;
            context.window.destroy();
            return;
        }

        self.transition(context, WindowPhase::AwaitingChoice).await;
        let prompt = ClosePrompt {
            task_id: context.task_id.clone(),
            running_task_ids: running,
        };

        match context.window.confirm_close(&prompt).await {
            CloseChoice::Cancel => {
                tracing::info!(task_id = %context.task_id, "Close cancelled by user");
                self.transition(context, WindowPhase::Open).await;
            }
            CloseChoice::StopAndClose => {
                self.transition(context, WindowPhase::Closing).await;
                let aborted =
                    agent::abort_all(context.agent.as_ref(), WINDOW_CLOSED_REASON).await;
                for task_id in &aborted {
                    events::publish(
                        context.window.as_ref(),
                        &self.events,
                        TaskEvent::TaskAbortedBySystem {
                            task_id: task_id.clone(),
                            reason: WINDOW_CLOSED_REASON.to_string(),
                            timestamp: Utc::now(),
                        },
                    );
                }
                tracing::info!(
                    task_id = %context.task_id,
                    aborted = aborted.len(),
                    "Stopping runs and closing task window"
                );

                tokio::time::sleep(self.close_grace_period).await;
                context.window.destroy();
            }
        }
    }

    async fn phase(&self, context: &Arc<ExecutionContext>) -> Option<WindowPhase> {
        self.slots
            .read()
            .await
            .get(&context.task_id)
            .filter(|slot| Arc::ptr_eq(&slot.context, context))
            .map(|slot| slot.phase)
    }

    async fn transition(&self, context: &Arc<ExecutionContext>, target: WindowPhase) {
        let mut slots = self.slots.write().await;
        let Some(slot) = slots
            .get_mut(&context.task_id)
            .filter(|slot| Arc::ptr_eq(&slot.context, context))
        else {
            return;
        };

        if !slot.phase.can_transition_to(target) {
            tracing::warn!(
                task_id = %context.task_id,
                "Cannot transition window from {} to {}",
                slot.phase,
                target
            );
            return;
        }
        slot.phase = target;
    }

    /// Sole destructor for an execution context.
    async fn teardown(&self, context: &Arc<ExecutionContext>) {
        let mut slots = self.slots.write().await;
        let owned = slots
            .get(&context.task_id)
            .is_some_and(|slot| Arc::ptr_eq(&slot.context, context));
        if owned {
            slots.remove(&context.task_id);
        }
        self.registry.unregister(context.handle()).await;
        drop(slots);

        tracing::info!(
            task_id = %context.task_id,
            handle = context.handle(),
            "Task window closed"
        );

        if owned && let Some(hook) = self.on_teardown.get() {
            hook(&context.task_id);
        }
    }
}

/// Forward the agent's intermediate events to its window until aborted.
///
/// Each event is tagged with the run the window currently serves.
fn spawn_agent_forwarder(slots: Slots, context: &Arc<ExecutionContext>) -> JoinHandle<()> {
    let window = Arc::clone(&context.window);
    let owner = Arc::clone(context);
    let mut stream = Box::pin(agent::event_stream(context.agent.as_ref()));

    tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            let execution_id = slots
                .read()
                .await
                .get(&owner.task_id)
                .filter(|slot| Arc::ptr_eq(&slot.context, &owner))
                .map(|slot| slot.execution_id);
            window.send(&TaskEvent::AgentStream {
                task_id: owner.task_id.clone(),
                execution_id,
                event,
            });
        }
    })
}
