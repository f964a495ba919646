//! Task scheduler: interval timers, dispatch, and the capacity queue.
//!
//! The scheduler provides:
//! - `schedule_task()`: arm (or re-arm) the timer for a task
//! - `execute_task_now()`: dispatch immediately, outside the timer
//! - dispatch: acquire an execution window and run the task's prompt in it,
//!   or queue the task when every slot is busy
//! - queue drain: after every run settles, start the oldest queued task

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{PoolError, SchedulerError};
use crate::events::{self, ExecutionStatus, TaskEvent};
use crate::task::{QueuedTask, RunningTaskRecord, Schedule, TaskDescriptor, compose_prompt};
use crate::window::{ExecutionContext, WindowPool};

/// A pending fire for one task.
struct ScheduledTimer {
    generation: u64,
    task_name: String,
    next_execute_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerState {
    is_running: bool,
    task_queue: VecDeque<QueuedTask>,
    running_tasks: HashMap<Uuid, RunningTaskRecord>,
    scheduled_timers: HashMap<String, ScheduledTimer>,
}

/// What a dispatch did with its task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum DispatchOutcome {
    /// A window took the task; the run is in flight.
    Started { execution_id: Uuid },
    /// Every slot was busy; the task waits in the queue.
    Queued { queue_length: usize },
    /// No window could be provisioned.
    Failed { reason: String },
}

/// Snapshot returned by the status command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub queue_length: usize,
    pub running_count: usize,
    pub scheduled_count: usize,
}

/// A task with a live timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTaskInfo {
    pub task_id: String,
    pub task_name: String,
    pub next_execute_at: DateTime<Utc>,
}

/// Schedules tasks onto execution windows.
pub struct Scheduler {
    pool: Arc<WindowPool>,
    events: broadcast::Sender<TaskEvent>,
    state: RwLock<SchedulerState>,
    generation: AtomicU64,
}

impl Scheduler {
    pub fn new(pool: Arc<WindowPool>, events: broadcast::Sender<TaskEvent>) -> Arc<Self> {
        let scheduler = Arc::new(Self {
            pool,
            events,
            state: RwLock::new(SchedulerState::default()),
            generation: AtomicU64::new(0),
        });

        // A destroyed window frees capacity and unblocks tasks queued behind its close
        let weak = Arc::downgrade(&scheduler);
        scheduler.pool.on_teardown(move |task_id| {
            let Some(scheduler) = weak.upgrade() else {
                return;
            };
            tracing::debug!(task_id = %task_id, "Task window torn down; draining queue");
            tokio::spawn(async move { scheduler.drain_queue().await });
        });

        scheduler
    }

    /// Start accepting schedules.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut state = self.state.write().await;
        if state.is_running {
            tracing::warn!("Scheduler is already running");
            return Err(SchedulerError::AlreadyRunning);
        }
        state.is_running = true;
        tracing::info!("Scheduler started");
        Ok(())
    }

    /// Cancel every timer and drop every queued task. In-flight runs continue.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let mut state = self.state.write().await;
        if !state.is_running {
            return Err(SchedulerError::NotRunning);
        }

        let timers = state.scheduled_timers.len();
        for (_, timer) in state.scheduled_timers.drain() {
            timer.handle.abort();
        }
        let dropped = state.task_queue.len();
        state.task_queue.clear();
        state.is_running = false;

        tracing::info!(timers, dropped, "Scheduler stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.is_running
    }

    /// Arm the timer for `task`, replacing any timer it already has.
    ///
    /// Returns the next fire time.
    pub async fn schedule_task(
        self: &Arc<Self>,
        task: TaskDescriptor,
    ) -> Result<DateTime<Utc>, SchedulerError> {
        let mut state = self.state.write().await;
        self.schedule_locked(&mut state, task)
    }

    /// Arm a timer while the caller holds the state guard.
    fn schedule_locked(
        self: &Arc<Self>,
        state: &mut SchedulerState,
        task: TaskDescriptor,
    ) -> Result<DateTime<Utc>, SchedulerError> {
        if !state.is_running {
            return Err(SchedulerError::NotStarted);
        }

        task.validate()
            .map_err(|reason| SchedulerError::InvalidTask { reason })?;
        let now = Utc::now();
        let (next_execute_at, delay) = plan_fire(&task, now)?;

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = spawn_timer(Arc::downgrade(self), task.clone(), generation, delay);

        let timer = ScheduledTimer {
            generation,
            task_name: task.name.clone(),
            next_execute_at,
            handle,
        };
        if let Some(previous) = state.scheduled_timers.insert(task.id.clone(), timer) {
            previous.handle.abort();
            tracing::debug!(task_id = %task.id, "Replaced existing timer");
        }

        tracing::info!(
            task_id = %task.id,
            next_execute_at = %next_execute_at,
            "Scheduled task"
        );
        Ok(next_execute_at)
    }

    /// Cancel the timer for `task_id`. Running and queued work is untouched.
    pub async fn remove_scheduled_task(&self, task_id: &str) -> Result<(), SchedulerError> {
        let mut state = self.state.write().await;
        let timer = state
            .scheduled_timers
            .remove(task_id)
            .ok_or_else(|| SchedulerError::NotFound {
                task_id: task_id.to_string(),
            })?;
        timer.handle.abort();
        tracing::info!(task_id = %task_id, "Removed scheduled task");
        Ok(())
    }

    /// Dispatch immediately. The task's timer, if any, keeps its fire time.
    pub async fn execute_task_now(
        self: &Arc<Self>,
        task: TaskDescriptor,
    ) -> Result<DispatchOutcome, SchedulerError> {
        task.validate()
            .map_err(|reason| SchedulerError::InvalidTask { reason })?;
        tracing::info!(task_id = %task.id, "Executing task now");
        Ok(self.dispatch(QueuedTask::from_descriptor(&task)).await)
    }

    pub async fn status(&self) -> SchedulerStatus {
        let state = self.state.read().await;
        SchedulerStatus {
            is_running: state.is_running,
            queue_length: state.task_queue.len(),
            running_count: state.running_tasks.len(),
            scheduled_count: state.scheduled_timers.len(),
        }
    }

    /// Tasks with a live timer, soonest first.
    pub async fn scheduled_tasks(&self) -> Vec<ScheduledTaskInfo> {
        let state = self.state.read().await;
        let mut tasks: Vec<ScheduledTaskInfo> = state
            .scheduled_timers
            .iter()
            .map(|(task_id, timer)| ScheduledTaskInfo {
                task_id: task_id.clone(),
                task_name: timer.task_name.clone(),
                next_execute_at: timer.next_execute_at,
            })
            .collect();
        tasks.sort_by_key(|t| t.next_execute_at);
        tasks
    }

    /// Queued tasks in dispatch order.
    pub async fn queued_tasks(&self) -> Vec<QueuedTask> {
        self.state.read().await.task_queue.iter().cloned().collect()
    }

    /// In-flight runs, oldest first.
    pub async fn running_tasks(&self) -> Vec<RunningTaskRecord> {
        let state = self.state.read().await;
        let mut records: Vec<RunningTaskRecord> = state.running_tasks.values().cloned().collect();
        records.sort_by_key(|r| r.start_time);
        records
    }

    /// Timer callback: retire this timer, re-arm periodic tasks, then dispatch.
    ///
    /// Retiring and re-arming happen under one guard, so a concurrent remove
    /// or reschedule lands either before the fire or after the re-arm.
    async fn on_timer_fired(self: &Arc<Self>, task: TaskDescriptor, generation: u64) {
        {
            let mut state = self.state.write().await;
            match state.scheduled_timers.get(&task.id) {
                Some(timer) if timer.generation == generation => {
                    state.scheduled_timers.remove(&task.id);
                }
                _ => {
                    tracing::debug!(task_id = %task.id, generation, "Stale timer fired; ignoring");
                    return;
                }
            }

            tracing::info!(task_id = %task.id, "Timer fired");

            if task.schedule.is_periodic()
                && let Err(e) = self.schedule_locked(&mut state, task.clone())
            {
                tracing::warn!(task_id = %task.id, error = %e, "Failed to re-arm periodic task");
            }
        }

        self.dispatch(QueuedTask::from_descriptor(&task)).await;
    }

    /// Shared path for timer fires and manual runs.
    async fn dispatch(self: &Arc<Self>, request: QueuedTask) -> DispatchOutcome {
        let outcome = self.try_dispatch(request, false).await;
        if matches!(outcome, DispatchOutcome::Failed { .. }) {
            self.drain_queue().await;
        }
        outcome
    }

    async fn try_dispatch(self: &Arc<Self>, request: QueuedTask, requeue_front: bool) -> DispatchOutcome {
        if !self.pool.can_run_new_task().await {
            return self.enqueue(request, requeue_front).await;
        }

        let execution_id = Uuid::new_v4();
        let context = match self.pool.acquire_context(&request.task_id, execution_id).await {
            Ok(context) => context,
            Err(PoolError::AtCapacity { .. } | PoolError::WindowClosing { .. }) => {
                return self.enqueue(request, requeue_front).await;
            }
            Err(e) => {
                tracing::error!(task_id = %request.task_id, error = %e, "Dispatch failed");
                return DispatchOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let record = RunningTaskRecord {
            task_id: request.task_id.clone(),
            execution_id,
            start_time: Utc::now(),
        };
        self.state
            .write()
            .await
            .running_tasks
            .insert(execution_id, record);

        tokio::spawn(Arc::clone(self).run_execution(context, request, execution_id));
        DispatchOutcome::Started { execution_id }
    }

    async fn enqueue(&self, request: QueuedTask, front: bool) -> DispatchOutcome {
        let mut state = self.state.write().await;
        tracing::info!(
            task_id = %request.task_id,
            queue_length = state.task_queue.len() + 1,
            "All task windows busy; queued task"
        );
        if front {
            state.task_queue.push_front(request);
        } else {
            state.task_queue.push_back(request);
        }
        DispatchOutcome::Queued {
            queue_length: state.task_queue.len(),
        }
    }

    /// Start the oldest queued task if a slot is free.
    async fn drain_queue(self: &Arc<Self>) {
        loop {
            if !self.pool.can_run_new_task().await {
                return;
            }
            let Some(next) = self.state.write().await.task_queue.pop_front() else {
                return;
            };

            tracing::info!(task_id = %next.task_id, "Dequeued task");
            match self.try_dispatch(next, true).await {
                DispatchOutcome::Failed { .. } => continue,
                _ => return,
            }
        }
    }

    /// Run one execution to completion, then hand the slot to the queue.
    fn run_execution(
        self: Arc<Self>,
        context: Arc<ExecutionContext>,
        request: QueuedTask,
        execution_id: Uuid,
    ) -> BoxFuture<'static, ()> {
        async move {
            let task_id = request.task_id.clone();
            let prompt = compose_prompt(&request.steps);

            events::publish(
                context.window.as_ref(),
                &self.events,
                TaskEvent::TaskExecutionStart {
                    task_id: task_id.clone(),
                    task_name: request.task_name.clone(),
                    execution_id,
                    steps: request.steps.clone(),
                },
            );
            tracing::info!(task_id = %task_id, execution_id = %execution_id, "Task execution started");

            let result = AssertUnwindSafe(context.agent.run(&prompt))
                .catch_unwind()
                .await;

            let (status, error) = match result {
                Ok(Ok(output)) if output.success => (ExecutionStatus::Completed, None),
                Ok(Ok(output)) => (ExecutionStatus::Failed, Some(output.result)),
                Ok(Err(e)) if e.is_abort() => (ExecutionStatus::Aborted, Some(e.to_string())),
                Ok(Err(e)) => (ExecutionStatus::Failed, Some(e.to_string())),
                Err(_) => (ExecutionStatus::Failed, Some("agent run panicked".to_string())),
            };

            match (&status, &error) {
                (ExecutionStatus::Failed, Some(reason)) => tracing::error!(
                    task_id = %task_id,
                    execution_id = %execution_id,
                    "Task execution failed: {}",
                    reason
                ),
                _ => tracing::info!(
                    task_id = %task_id,
                    execution_id = %execution_id,
                    status = %status,
                    "Task execution finished"
                ),
            }

            self.state.write().await.running_tasks.remove(&execution_id);
            self.pool.release(&task_id, execution_id).await;

            events::publish(
                context.window.as_ref(),
                &self.events,
                TaskEvent::TaskExecutionComplete {
                    task_id,
                    task_name: request.task_name,
                    execution_id,
                    status,
                    end_time: Utc::now(),
                    error,
                },
            );

            self.drain_queue().await;
        }
        .boxed()
    }
}

/// Compute the next fire time and the delay until it.
fn plan_fire(
    task: &TaskDescriptor,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, Duration), SchedulerError> {
    if let Schedule::Cron { .. } = task.schedule {
        return Err(SchedulerError::CronUnsupported {
            task_id: task.id.clone(),
        });
    }

    let next = task
        .schedule
        .next_fire_after(now)
        .ok_or_else(|| SchedulerError::InvalidSchedule {
            task_id: task.id.clone(),
            reason: "interval must be a positive number of minutes, hours, or days".to_string(),
        })?;

    let delay = next
        .signed_duration_since(now)
        .to_std()
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| SchedulerError::PastFireTime {
            task_id: task.id.clone(),
        })?;

    Ok((next, delay))
}

fn spawn_timer(
    scheduler: Weak<Scheduler>,
    task: TaskDescriptor,
    generation: u64,
    delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(scheduler) = scheduler.upgrade() {
            scheduler.on_timer_fired(task, generation).await;
        }
    })
}
