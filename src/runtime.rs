//! Composition root.
//!
//! `TaskRuntime` owns the single scheduler, window pool, and registry for the
//! process. The host shell creates one at startup, calls `init()`, routes IPC
//! commands through `handle()` / `route_agent_command()`, and calls
//! `shutdown()` on exit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::agent::{AgentRunResult, AgentServiceFactory};
use crate::commands::{AgentCommand, CommandResponse, TaskCommand};
use crate::config::RuntimeConfig;
use crate::error::{Error, PoolError, SchedulerError, WindowError};
use crate::events::TaskEvent;
use crate::scheduler::Scheduler;
use crate::store::{JsonFileTaskSource, TaskSource};
use crate::window::{WindowHandle, WindowHost, WindowPool, WindowRegistry};

/// Result of loading persisted schedules at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitReport {
    pub loaded: usize,
    pub scheduled: usize,
    pub disabled: usize,
    pub failed: usize,
}

/// Reply to a routed agent command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum AgentReply {
    Result { result: AgentRunResult },
    Aborted { task_id: String, aborted: bool },
    Tasks { task_ids: Vec<String> },
}

/// The scheduled-task subsystem, wired together.
pub struct TaskRuntime {
    config: RuntimeConfig,
    registry: Arc<WindowRegistry>,
    pool: Arc<WindowPool>,
    scheduler: Arc<Scheduler>,
    events: broadcast::Sender<TaskEvent>,
    initialized: AtomicBool,
}

impl TaskRuntime {
    pub fn new(
        config: RuntimeConfig,
        host: Arc<dyn WindowHost>,
        agents: Arc<dyn AgentServiceFactory>,
    ) -> Self {
        let (events, _rx) = broadcast::channel(config.event_capacity.max(1));
        let registry = Arc::new(WindowRegistry::new());
        let pool = Arc::new(WindowPool::new(
            &config,
            host,
            agents,
            Arc::clone(&registry),
            events.clone(),
        ));
        let scheduler = Scheduler::new(Arc::clone(&pool), events.clone());

        Self {
            config,
            registry,
            pool,
            scheduler,
            events,
            initialized: AtomicBool::new(false),
        }
    }

    /// Start the scheduler and re-arm enabled tasks from the configured task file.
    pub async fn init(&self) -> Result<InitReport, Error> {
        match &self.config.task_source_path {
            Some(path) => {
                let source = JsonFileTaskSource::new(path);
                self.init_from(&source).await
            }
            None => {
                self.start_scheduler().await;
                Ok(InitReport::default())
            }
        }
    }

    /// Start the scheduler and re-arm every enabled task from `source`.
    ///
    /// A task that fails to schedule is logged and skipped.
    pub async fn init_from(&self, source: &dyn TaskSource) -> Result<InitReport, Error> {
        self.start_scheduler().await;

        let tasks = source.load_tasks().await?;
        let mut report = InitReport {
            loaded: tasks.len(),
            ..Default::default()
        };

        for stored in tasks {
            if !stored.enabled {
                report.disabled += 1;
                continue;
            }
            let task_id = stored.descriptor.id.clone();
            match self.scheduler.schedule_task(stored.descriptor).await {
                Ok(_) => report.scheduled += 1,
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "Skipping stored task");
                    report.failed += 1;
                }
            }
        }

        self.mark_initialized();
        tracing::info!(
            loaded = report.loaded,
            scheduled = report.scheduled,
            disabled = report.disabled,
            failed = report.failed,
            "Task runtime initialized"
        );
        Ok(report)
    }

    /// Stop scheduling and ask every task window to close.
    pub async fn shutdown(&self) {
        if let Err(e) = self.scheduler.stop().await {
            tracing::debug!(error = %e, "Scheduler already stopped at shutdown");
        }
        let closing = self.pool.close_all_task_windows().await;
        tracing::info!(windows = closing, "Task runtime shut down");
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn pool(&self) -> &Arc<WindowPool> {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<WindowRegistry> {
        &self.registry
    }

    /// Subscribe to task events across all windows.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Relaxed);
    }

    /// Execute one command from the UI or storage layer.
    pub async fn handle(&self, command: TaskCommand) -> CommandResponse {
        tracing::debug!(?command, "Handling task command");
        match command {
            TaskCommand::StartScheduler => self.scheduler.start().await.into(),
            TaskCommand::StopScheduler => self.scheduler.stop().await.into(),
            TaskCommand::AddScheduledTask { task } | TaskCommand::UpdateScheduledTask { task } => {
                self.scheduler
                    .schedule_task(task)
                    .await
                    .map(|next| serde_json::json!({ "nextExecuteAt": next }))
                    .into()
            }
            TaskCommand::RemoveScheduledTask { task_id } => {
                self.scheduler.remove_scheduled_task(&task_id).await.into()
            }
            TaskCommand::ExecuteTaskNow { task } => {
                self.scheduler.execute_task_now(task).await.into()
            }
            TaskCommand::GetStatus => CommandResponse::with_data(&self.scheduler.status().await),
            TaskCommand::GetScheduledTasks => {
                CommandResponse::with_data(&self.scheduler.scheduled_tasks().await)
            }
            TaskCommand::GetRunningTasks => {
                CommandResponse::with_data(&self.pool.get_running_tasks().await)
            }
            TaskCommand::IsInitialized => CommandResponse::with_data(&self.is_initialized()),
            TaskCommand::MarkInitialized => {
                self.mark_initialized();
                CommandResponse::ok()
            }
            TaskCommand::SetMaxConcurrent { value } => self.pool.set_max_concurrent(value).into(),
            TaskCommand::CloseTaskWindow { task_id } => {
                if self.pool.close_task_window(&task_id).await {
                    CommandResponse::message(format!("Closing task window for {task_id}"))
                } else {
                    CommandResponse::error(PoolError::ContextNotFound { task_id }.to_string())
                }
            }
        }
    }

    /// Route an agent command to the agent owned by the window behind `handle`.
    pub async fn route_agent_command(
        &self,
        handle: WindowHandle,
        command: AgentCommand,
    ) -> Result<AgentReply, Error> {
        let agent = self
            .registry
            .agent_for(handle)
            .await
            .ok_or(WindowError::UnknownHandle { handle })?;

        let reply = match command {
            AgentCommand::Run { prompt } => AgentReply::Result {
                result: agent.run(&prompt).await?,
            },
            AgentCommand::Modify { task_id, prompt } => AgentReply::Result {
                result: agent.modify(&task_id, &prompt).await?,
            },
            AgentCommand::Execute { task_id } => AgentReply::Result {
                result: agent.execute(&task_id).await?,
            },
            AgentCommand::Abort { task_id, reason } => {
                let aborted = agent.abort_task(&task_id, &reason).await?;
                AgentReply::Aborted { task_id, aborted }
            }
            AgentCommand::ListTasks => AgentReply::Tasks {
                task_ids: agent.all_task_ids().await,
            },
        };
        Ok(reply)
    }

    async fn start_scheduler(&self) {
        match self.scheduler.start().await {
            Ok(()) | Err(SchedulerError::AlreadyRunning) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to start scheduler"),
        }
    }
}
