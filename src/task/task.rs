//! A single schedulable unit of asynchronous work.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, broadcast, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use super::completion::Completion;
use super::graph;
use super::state::{TaskEvent, TaskOutcome, TaskState};
use crate::error::{GateError, TaskError};
use crate::gate::{Gate, GatePermit};

/// Per-task event buffer. A task emits at most two transitions.
const TASK_EVENT_CAPACITY: usize = 4;

/// Deferred computation run by a task. It must call [`Completion::complete`]
/// exactly once, inline or from another thread. Runs on tokio's blocking pool,
/// so it may do its work synchronously.
pub type Body = Box<dyn FnOnce(Completion) + Send + 'static>;

/// Callback invoked when a task's completion does not arrive in time.
pub type TimeoutCallback = Box<dyn FnOnce(&Task) + Send + 'static>;

/// Someone outside the task that follows its transitions (a queue).
#[derive(Clone)]
pub(crate) struct Observer {
    pub id: Uuid,
    /// Event fan-out. `None` when the observer only needs to know about finishes.
    pub events: Option<broadcast::Sender<TaskEvent>>,
    /// Poked every time the task finishes.
    pub wake: Arc<Notify>,
}

/// Everything mutable about a task. Only touched under `Inner::core`.
struct Core {
    state: TaskState,
    cancelled: bool,
    outcome: Option<TaskOutcome>,
    body: Option<Body>,
    gate: Option<Gate>,
    permit: Option<GatePermit>,
    timeout: Option<Duration>,
    on_timeout: Option<TimeoutCallback>,
    /// Whether `start` waits for the completion signal.
    awaits_completion: bool,
    dependencies: Vec<Task>,
    observers: Vec<Observer>,
}

struct Inner {
    id: Uuid,
    name: Option<String>,
    core: Mutex<Core>,
    events: broadcast::Sender<TaskEvent>,
    state_tx: watch::Sender<TaskState>,
}

impl Inner {
    /// The single mutation path for `state`. Emits the event while the lock is
    /// held so observers see transitions in the order they happened.
    fn transition(&self, core: &mut Core, to: TaskState) -> bool {
        let from = core.state;
        if !from.can_transition_to(to) {
            return false;
        }
        core.state = to;

        let event = TaskEvent::new(self.id, from, to);
        self.state_tx.send_replace(to);
        let _ = self.events.send(event);
        for observer in &core.observers {
            if let Some(events) = &observer.events {
                let _ = events.send(event);
            }
            if to.is_terminal() {
                observer.wake.notify_one();
            }
        }

        debug!(task_id = %self.id, %from, %to, "Task state changed");
        true
    }

    /// Move to `Finished`, giving back the permit if one is held.
    ///
    /// Returns whatever the task no longer needs so the caller can drop it
    /// after releasing the lock.
    fn finish(&self, core: &mut Core, outcome: TaskOutcome) -> Leftovers {
        if !self.transition(core, TaskState::Finished) {
            return Leftovers::default();
        }
        core.outcome = Some(outcome);
        if let Some(permit) = core.permit.take() {
            permit.release();
        }
        Leftovers {
            body: core.body.take(),
            on_timeout: core.on_timeout.take(),
        }
    }
}

/// User closures detached from a finished task, dropped outside the lock.
#[derive(Default)]
struct Leftovers {
    body: Option<Body>,
    on_timeout: Option<TimeoutCallback>,
}

/// Handle to a task. Cloning is cheap and yields a handle to the same task.
///
/// ```text
/// Pending ──start──▶ Running ──complete / cancel / timeout──▶ Finished
///    └────────────────────cancel─────────────────────────────────▲
/// ```
#[derive(Clone)]
pub struct Task {
    inner: Arc<Inner>,
}

impl Task {
    /// Create a task around `body`.
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        Self::builder(body).build()
    }

    /// Create a task that gives its body `timeout` to signal completion.
    ///
    /// When the time runs out the task is finished as [`TaskOutcome::TimedOut`]
    /// and `on_timeout` is invoked with the task.
    pub fn with_timeout<F, T>(body: F, timeout: Duration, on_timeout: T) -> Self
    where
        F: FnOnce(Completion) + Send + 'static,
        T: FnOnce(&Task) + Send + 'static,
    {
        Self::builder(body)
            .timeout(timeout)
            .on_timeout(on_timeout)
            .build()
    }

    /// Start building a task around `body`.
    pub fn builder<F>(body: F) -> TaskBuilder
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        TaskBuilder {
            body: Box::new(body),
            name: None,
            gate: None,
            timeout: None,
            on_timeout: None,
        }
    }

    /// Unique task id.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Diagnostic name, if one was given.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        self.inner.core.lock().state
    }

    /// How the task finished, once it has.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.inner.core.lock().outcome
    }

    /// `Pending`, not cancelled, and every dependency `Finished`.
    pub fn is_ready(&self) -> bool {
        let dependencies = {
            let core = self.inner.core.lock();
            if core.state != TaskState::Pending || core.cancelled {
                return false;
            }
            core.dependencies.clone()
        };
        dependencies.iter().all(Task::is_finished)
    }

    pub fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    pub fn is_finished(&self) -> bool {
        self.state() == TaskState::Finished
    }

    /// Whether the task was cancelled, timed out, or lost its body to a panic.
    /// Never cleared.
    pub fn is_cancelled(&self) -> bool {
        self.inner.core.lock().cancelled
    }

    /// Tasks that must finish before this one may run.
    pub fn dependencies(&self) -> Vec<Task> {
        self.inner.core.lock().dependencies.clone()
    }

    /// Make this task wait for `dependency`.
    ///
    /// Fails if the edge would close a cycle or this task has already left
    /// `Pending`. Adding an existing edge again is a no-op.
    pub fn add_dependency(&self, dependency: &Task) -> Result<(), TaskError> {
        self.add_dependencies(std::slice::from_ref(dependency))
    }

    /// Add several dependencies at once. Either all edges are added or none.
    pub(crate) fn add_dependencies(&self, dependencies: &[Task]) -> Result<(), TaskError> {
        let _edges = graph::lock_edges();

        for dependency in dependencies {
            graph::validate_edge(self, dependency)?;
        }

        let mut core = self.inner.core.lock();
        if core.state != TaskState::Pending {
            return Err(TaskError::AlreadyStarted {
                id: self.id(),
                state: core.state,
            });
        }
        for dependency in dependencies {
            if !core.dependencies.contains(dependency) {
                core.dependencies.push(dependency.clone());
            }
        }
        Ok(())
    }

    /// Subscribe to this task's own transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until the task is `Finished`, however it gets there.
    pub async fn wait_finished(&self) {
        let mut rx = self.inner.state_tx.subscribe();
        // The sender lives in `self`, so this can only return Ok.
        let _ = rx.wait_for(TaskState::is_terminal).await;
    }

    /// Run the task.
    ///
    /// Moves to `Running`, waits for a gate permit (if the task has a gate),
    /// then invokes the body on the blocking pool and waits for it to return.
    /// Calling `start` on a task that is not `Pending` does nothing, so the
    /// body runs at most once. A task cancelled while waiting for its permit
    /// stops waiting and never takes one. A body that panics finishes the task
    /// as [`TaskOutcome::Cancelled`].
    ///
    /// For tasks built with a timeout (or an on-timeout callback) this waits
    /// for the completion signal instead of the body's return; see
    /// [`Task::with_timeout`].
    pub async fn start(&self) {
        let (gate, awaits_completion, timeout) = {
            let mut core = self.inner.core.lock();
            let state = core.state;
            match state {
                TaskState::Pending => {
                    self.inner.transition(&mut core, TaskState::Running);
                    (core.gate.clone(), core.awaits_completion, core.timeout)
                }
                state => {
                    debug!(task_id = %self.id(), %state, "Ignoring start on a task that already left pending");
                    return;
                }
            }
        };

        let permit = match gate {
            Some(gate) => match self.acquire_permit(&gate).await {
                Some(permit) => Some(permit),
                None => return,
            },
            None => None,
        };

        let body = {
            let mut core = self.inner.core.lock();
            if core.state != TaskState::Running {
                // Cancelled between admission and here. The permit goes back
                // to the gate when it drops at the end of this scope.
                return;
            }
            core.permit = permit;
            core.body.take()
        };

        let Some(body) = body else {
            return;
        };

        // Bodies may block, so they never run on a runtime worker.
        let completion = Completion::new(self.clone());
        let handle = tokio::task::spawn_blocking(move || body(completion));
        let task = self.clone();
        let body_returned = async move {
            if let Err(err) = handle.await {
                task.body_failed(&err);
            }
        };

        if awaits_completion {
            tokio::spawn(body_returned);
            self.await_completion(timeout).await;
        } else {
            body_returned.await;
        }
    }

    /// The body panicked (or was torn down with the runtime) before signalling.
    fn body_failed(&self, err: &tokio::task::JoinError) {
        let leftovers = {
            let mut core = self.inner.core.lock();
            if core.state != TaskState::Running {
                return;
            }
            core.cancelled = true;
            self.inner.finish(&mut core, TaskOutcome::Cancelled)
        };
        drop(leftovers);
        warn!(task_id = %self.id(), error = %err, "Task body failed before completing");
    }

    /// Wait for a gate permit, giving up if the task finishes first.
    async fn acquire_permit(&self, gate: &Gate) -> Option<GatePermit> {
        let mut state_rx = self.inner.state_tx.subscribe();
        tokio::select! {
            biased;
            _ = state_rx.wait_for(TaskState::is_terminal) => None,
            permit = gate.acquire() => match permit {
                Ok(permit) => Some(permit),
                Err(GateError::Closed) => {
                    warn!(task_id = %self.id(), "Gate closed before task was admitted");
                    let leftovers = {
                        let mut core = self.inner.core.lock();
                        core.cancelled = true;
                        self.inner.finish(&mut core, TaskOutcome::Cancelled)
                    };
                    drop(leftovers);
                    None
                }
            },
        }
    }

    async fn await_completion(&self, timeout: Option<Duration>) {
        let Some(limit) = timeout else {
            self.wait_finished().await;
            return;
        };

        if tokio::time::timeout(limit, self.wait_finished()).await.is_ok() {
            return;
        }

        let callback = {
            let mut core = self.inner.core.lock();
            if core.state.is_terminal() {
                // Completed right at the deadline.
                return;
            }
            core.cancelled = true;
            let callback = core.on_timeout.take();
            let leftovers = self.inner.finish(&mut core, TaskOutcome::TimedOut);
            drop(core);
            drop(leftovers);
            callback
        };

        warn!(task_id = %self.id(), timeout = ?limit, "Task timed out waiting for completion");
        if let Some(callback) = callback {
            callback(self);
        }
    }

    /// Cancel the task.
    ///
    /// A `Pending` task finishes immediately without running its body. A
    /// `Running` task gives back its permit and finishes immediately; its body
    /// keeps going and its eventual completion signal is ignored. Dependents
    /// are not cancelled; they become eligible because this task finished.
    pub fn cancel(&self) {
        let leftovers = {
            let mut core = self.inner.core.lock();
            core.cancelled = true;
            let state = core.state;
            match state {
                TaskState::Pending | TaskState::Running => {
                    self.inner.finish(&mut core, TaskOutcome::Cancelled)
                }
                TaskState::Finished => return,
            }
        };
        drop(leftovers);
    }

    /// Called by the body's [`Completion`].
    pub(crate) fn signal_completion(&self) {
        let leftovers = {
            let mut core = self.inner.core.lock();
            if core.state != TaskState::Running {
                debug!(
                    task_id = %self.id(),
                    state = %core.state,
                    "Ignoring completion signal, task already finished"
                );
                return;
            }
            self.inner.finish(&mut core, TaskOutcome::Completed)
        };
        drop(leftovers);
    }

    /// Give the task a gate unless it was built with its own.
    pub(crate) fn inject_gate(&self, gate: &Gate) {
        let mut core = self.inner.core.lock();
        if core.gate.is_none() {
            core.gate = Some(gate.clone());
        }
    }

    /// Apply a default timeout to a task that has no timeout handling of its own.
    pub(crate) fn inject_default_timeout(&self, timeout: Duration) {
        let mut core = self.inner.core.lock();
        if core.state == TaskState::Pending && !core.awaits_completion {
            core.timeout = Some(timeout);
            core.awaits_completion = true;
        }
    }

    /// Register an observer. A finished task wakes it right away.
    pub(crate) fn attach(&self, observer: Observer) {
        let mut core = self.inner.core.lock();
        if core.state.is_terminal() {
            observer.wake.notify_one();
        }
        match core.observers.iter_mut().find(|o| o.id == observer.id) {
            Some(existing) => {
                if existing.events.is_none() {
                    existing.events = observer.events;
                }
            }
            None => core.observers.push(observer),
        }
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Task {}

impl std::hash::Hash for Task {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &core.state)
            .field("cancelled", &core.cancelled)
            .field("outcome", &core.outcome)
            .field("dependencies", &core.dependencies.len())
            .finish()
    }
}

/// Builder for [`Task`].
pub struct TaskBuilder {
    body: Body,
    name: Option<String>,
    gate: Option<Gate>,
    timeout: Option<Duration>,
    on_timeout: Option<TimeoutCallback>,
}

impl TaskBuilder {
    /// Diagnostic name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Gate the body must pass through. A queue injects its own gate into
    /// tasks that have none.
    pub fn gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// How long the body gets to signal completion after it is invoked.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Callback for when the timeout elapses first.
    pub fn on_timeout<T>(mut self, callback: T) -> Self
    where
        T: FnOnce(&Task) + Send + 'static,
    {
        self.on_timeout = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> Task {
        let (events, _) = broadcast::channel(TASK_EVENT_CAPACITY);
        let (state_tx, _) = watch::channel(TaskState::Pending);
        let awaits_completion = self.timeout.is_some() || self.on_timeout.is_some();

        Task {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                name: self.name,
                core: Mutex::new(Core {
                    state: TaskState::Pending,
                    cancelled: false,
                    outcome: None,
                    body: Some(self.body),
                    gate: self.gate,
                    permit: None,
                    timeout: self.timeout,
                    on_timeout: self.on_timeout,
                    awaits_completion,
                    dependencies: Vec::new(),
                    observers: Vec::new(),
                }),
                events,
                state_tx,
            }),
        }
    }
}
