//! In-memory fakes for the window host and agent adapter seams.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore, broadcast, mpsc};
use tokio::time::timeout;

use task_windows::agent::{
    AgentEvent, AgentRunResult, AgentService, AgentServiceFactory, AgentTaskStatus,
};
use task_windows::error::{AgentError, WindowError};
use task_windows::events::TaskEvent;
use task_windows::task::{IntervalUnit, Schedule, TaskDescriptor, TaskStep};
use task_windows::window::{
    CloseChoice, ClosePrompt, ExecutionRoute, OpenedWindow, TaskWindow, WindowEvent, WindowHandle,
    WindowHost,
};
use task_windows::{RuntimeConfig, TaskRuntime};

/// Maximum time any wait is allowed before we consider the test hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ── Window host ─────────────────────────────────────────────────────

pub struct FakeWindow {
    pub task_id: String,
    handle: WindowHandle,
    events: mpsc::UnboundedSender<WindowEvent>,
    navigations: Mutex<Vec<String>>,
    sent: Mutex<Vec<TaskEvent>>,
    focus_count: AtomicUsize,
    prompts: AtomicUsize,
    destroyed: AtomicBool,
    close_choice: Mutex<CloseChoice>,
}

impl FakeWindow {
    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<TaskEvent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_names(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(|e| e.name()).collect()
    }

    pub fn focus_count(&self) -> usize {
        self.focus_count.load(Ordering::SeqCst)
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn set_close_choice(&self, choice: CloseChoice) {
        *self.close_choice.lock().unwrap() = choice;
    }

    /// Simulate the user clicking the window's close button.
    pub fn user_close(&self) {
        let _ = self.events.send(WindowEvent::CloseRequested);
    }

    /// Simulate the OS tearing the window down without asking.
    pub fn force_closed(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        let _ = self.events.send(WindowEvent::Closed);
    }
}

#[async_trait]
impl TaskWindow for FakeWindow {
    fn handle(&self) -> WindowHandle {
        self.handle
    }

    async fn navigate(&self, route: &ExecutionRoute) -> Result<(), WindowError> {
        self.navigations.lock().unwrap().push(route.path());
        Ok(())
    }

    fn focus(&self) {
        self.focus_count.fetch_add(1, Ordering::SeqCst);
    }

    fn request_close(&self) {
        let _ = self.events.send(WindowEvent::CloseRequested);
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(WindowEvent::Closed);
        }
    }

    fn send(&self, event: &TaskEvent) {
        self.sent.lock().unwrap().push(event.clone());
    }

    async fn confirm_close(&self, _prompt: &ClosePrompt) -> CloseChoice {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        *self.close_choice.lock().unwrap()
    }
}

#[derive(Default)]
pub struct FakeHost {
    next_handle: AtomicU64,
    windows: Mutex<Vec<Arc<FakeWindow>>>,
    fail: AtomicBool,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every window ever opened, in creation order.
    pub fn windows(&self) -> Vec<Arc<FakeWindow>> {
        self.windows.lock().unwrap().clone()
    }

    pub fn opened(&self) -> usize {
        self.windows.lock().unwrap().len()
    }

    /// Most recent window opened for `task_id`.
    pub fn window_for(&self, task_id: &str) -> Arc<FakeWindow> {
        self.windows
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|w| w.task_id == task_id)
            .cloned()
            .unwrap_or_else(|| panic!("no window opened for {task_id}"))
    }
}

impl WindowHost for FakeHost {
    fn open_window(&self, task_id: &str) -> Result<OpenedWindow, WindowError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(WindowError::CreationFailed("display unavailable".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let window = Arc::new(FakeWindow {
            task_id: task_id.to_string(),
            handle: self.next_handle.fetch_add(1, Ordering::SeqCst) + 1,
            events: tx,
            navigations: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            focus_count: AtomicUsize::new(0),
            prompts: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
            close_choice: Mutex::new(CloseChoice::StopAndClose),
        });
        self.windows.lock().unwrap().push(Arc::clone(&window));

        Ok(OpenedWindow { window, events: rx })
    }
}

// ── Agent adapter ───────────────────────────────────────────────────

/// How a gated run ends once released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeed,
    /// Returns a result with `success: false`.
    Unsuccessful,
    /// Returns an `ExecutionFailed` error.
    Error,
    Panic,
}

pub struct FakeAgent {
    pub window_task_id: String,
    next_run: AtomicU64,
    /// Agent task id -> aborted flag, for runs that have not returned yet.
    tasks: Mutex<HashMap<String, bool>>,
    prompts: Mutex<Vec<String>>,
    aborts: Mutex<Vec<(String, String)>>,
    gate: Semaphore,
    abort_signal: Notify,
    outcome: Mutex<RunOutcome>,
    events: broadcast::Sender<AgentEvent>,
}

impl FakeAgent {
    fn new(window_task_id: &str, outcome: RunOutcome) -> Self {
        let (events, _rx) = broadcast::channel(64);
        Self {
            window_task_id: window_task_id.to_string(),
            next_run: AtomicU64::new(0),
            tasks: Mutex::new(HashMap::new()),
            prompts: Mutex::new(Vec::new()),
            aborts: Mutex::new(Vec::new()),
            gate: Semaphore::new(0),
            abort_signal: Notify::new(),
            outcome: Mutex::new(outcome),
            events,
        }
    }

    /// Let one pending (or future) run finish.
    pub fn finish_one(&self) {
        self.gate.add_permits(1);
    }

    pub fn set_outcome(&self, outcome: RunOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn aborts(&self) -> Vec<(String, String)> {
        self.aborts.lock().unwrap().clone()
    }

    pub fn emit(&self, event: AgentEvent) {
        let _ = self.events.send(event);
    }

    fn is_aborted(&self, id: &str) -> bool {
        self.tasks.lock().unwrap().get(id).copied().unwrap_or(false)
    }

    async fn wait_for_release(&self, id: &str) -> Result<(), AgentError> {
        loop {
            let aborted = self.abort_signal.notified();
            tokio::pin!(aborted);
            aborted.as_mut().enable();

            if self.is_aborted(id) {
                return Err(AgentError::Aborted {
                    reason: "aborted".into(),
                });
            }

            tokio::select! {
                permit = self.gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                    return Ok(());
                }
                _ = &mut aborted => continue,
            }
        }
    }
}

#[async_trait]
impl AgentService for FakeAgent {
    async fn run(&self, prompt: &str) -> Result<AgentRunResult, AgentError> {
        let id = format!("run-{}", self.next_run.fetch_add(1, Ordering::SeqCst) + 1);
        self.tasks.lock().unwrap().insert(id.clone(), false);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.emit(AgentEvent::Message {
            task_id: id.clone(),
            text: "planning".into(),
        });

        let released = self.wait_for_release(&id).await;
        self.tasks.lock().unwrap().remove(&id);
        released?;

        let outcome = *self.outcome.lock().unwrap();
        self.emit(AgentEvent::Finish {
            task_id: id.clone(),
        });
        match outcome {
            RunOutcome::Succeed => Ok(AgentRunResult {
                task_id: id,
                success: true,
                result: "done".into(),
            }),
            RunOutcome::Unsuccessful => Ok(AgentRunResult {
                task_id: id,
                success: false,
                result: "could not finish".into(),
            }),
            RunOutcome::Error => Err(AgentError::ExecutionFailed("model unavailable".into())),
            RunOutcome::Panic => panic!("agent crashed"),
        }
    }

    async fn modify(&self, task_id: &str, prompt: &str) -> Result<AgentRunResult, AgentError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(AgentRunResult {
            task_id: task_id.to_string(),
            success: true,
            result: "modified".into(),
        })
    }

    async fn execute(&self, task_id: &str) -> Result<AgentRunResult, AgentError> {
        if !self.tasks.lock().unwrap().contains_key(task_id) {
            return Err(AgentError::TaskNotFound {
                task_id: task_id.to_string(),
            });
        }
        Ok(AgentRunResult {
            task_id: task_id.to_string(),
            success: true,
            result: "executed".into(),
        })
    }

    async fn abort_task(&self, task_id: &str, reason: &str) -> Result<bool, AgentError> {
        let known = match self.tasks.lock().unwrap().get_mut(task_id) {
            Some(aborted) => {
                *aborted = true;
                true
            }
            None => false,
        };
        if known {
            self.aborts
                .lock()
                .unwrap()
                .push((task_id.to_string(), reason.to_string()));
            self.abort_signal.notify_waiters();
        }
        Ok(known)
    }

    async fn all_task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tasks.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn task_status(&self, task_id: &str) -> Option<AgentTaskStatus> {
        self.tasks
            .lock()
            .unwrap()
            .get(task_id)
            .map(|aborted| AgentTaskStatus { aborted: *aborted })
    }

    fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }
}

pub struct FakeAgentFactory {
    agents: Mutex<Vec<Arc<FakeAgent>>>,
    outcome: Mutex<RunOutcome>,
}

impl FakeAgentFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            agents: Mutex::new(Vec::new()),
            outcome: Mutex::new(RunOutcome::Succeed),
        })
    }

    pub fn set_default_outcome(&self, outcome: RunOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn created(&self) -> usize {
        self.agents.lock().unwrap().len()
    }

    /// Most recent agent created for `task_id`.
    pub fn agent_for(&self, task_id: &str) -> Arc<FakeAgent> {
        self.agents
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|a| a.window_task_id == task_id)
            .cloned()
            .unwrap_or_else(|| panic!("no agent created for {task_id}"))
    }
}

impl AgentServiceFactory for FakeAgentFactory {
    fn create(&self, task_id: &str) -> Arc<dyn AgentService> {
        let agent = Arc::new(FakeAgent::new(task_id, *self.outcome.lock().unwrap()));
        self.agents.lock().unwrap().push(Arc::clone(&agent));
        agent
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub runtime: TaskRuntime,
    pub host: Arc<FakeHost>,
    pub agents: Arc<FakeAgentFactory>,
    pub events: broadcast::Receiver<TaskEvent>,
}

pub fn config(max_concurrent: usize) -> RuntimeConfig {
    RuntimeConfig {
        max_concurrent,
        close_grace_period: Duration::from_millis(100),
        ..RuntimeConfig::default()
    }
}

pub fn harness(max_concurrent: usize) -> Harness {
    harness_with(config(max_concurrent))
}

/// Route library logs to the test writer. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn harness_with(config: RuntimeConfig) -> Harness {
    init_tracing();
    let host = FakeHost::new();
    let agents = FakeAgentFactory::new();
    let runtime = TaskRuntime::new(config, host.clone(), agents.clone());
    let events = runtime.subscribe();
    Harness {
        runtime,
        host,
        agents,
        events,
    }
}

pub fn interval_task(id: &str, value: u32, unit: IntervalUnit) -> TaskDescriptor {
    TaskDescriptor::new(
        id,
        format!("Task {id}"),
        vec![
            TaskStep::new(2, "Summarize the headlines"),
            TaskStep::new(1, "Open the news site"),
        ],
        Schedule::every(value, unit),
    )
}

pub fn task(id: &str) -> TaskDescriptor {
    interval_task(id, 1, IntervalUnit::Minute)
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Receive bus events until one matches `pred`.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<TaskEvent>, mut pred: F) -> TaskEvent
where
    F: FnMut(&TaskEvent) -> bool,
{
    timeout(TEST_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for task event")
}

/// Wait for the completion event of `task_id`.
pub async fn wait_complete(rx: &mut broadcast::Receiver<TaskEvent>, task_id: &str) -> TaskEvent {
    let id = task_id.to_string();
    wait_for(rx, move |e| {
        matches!(e, TaskEvent::TaskExecutionComplete { task_id, .. } if *task_id == id)
    })
    .await
}

/// Poll until `check` holds, yielding between attempts.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    timeout(TEST_TIMEOUT, async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}
