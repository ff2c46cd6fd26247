//! Task queue — dependency ordering and bounded dispatch.
//!
//! The queue provides:
//! - `add_task()` / `add_dependency()` — submission with cycle-checked edges
//! - `add_barrier()` — a sink task that waits for everything submitted so far
//! - `run()` — the dispatch loop, honouring `max_concurrency` and FIFO order
//! - `cancel_all()` — bulk cancellation
//! - `on_all_finished()` — a once-per-cycle completion hook
//! - `subscribe()` / `events()` — state-change notifications for every task

use std::collections::HashSet;
use std::sync::Arc;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::gate::Gate;
use crate::queue::state::{QueueState, QueueSummary};
use crate::task::{Observer, Task, TaskEvent, TaskOutcome, TaskState};

type FinishedCallback = Box<dyn FnOnce() + Send + 'static>;

/// A submitted task and whether the dispatcher already handed it off.
struct Entry {
    task: Task,
    dispatched: bool,
}

struct QueueInner {
    state: QueueState,
    /// Submission order. Emptied when a run cycle completes.
    entries: Vec<Entry>,
    ids: HashSet<Uuid>,
    on_all_finished: Vec<FinishedCallback>,
    /// Counts for tasks of completed cycles, which are no longer held.
    retired: QueueSummary,
}

/// Result of one scheduling pass.
enum Pass {
    /// Tasks are still pending or in flight.
    Busy,
    /// Every task finished. Holds the callbacks to fire.
    Finished(Vec<FinishedCallback>),
}

/// Holds tasks and dispatches them once their dependencies have finished.
pub struct TaskQueue {
    id: Uuid,
    config: QueueConfig,
    gate: Gate,
    inner: Mutex<QueueInner>,
    /// Poked by tasks when they finish and by anything that changes the queue.
    wake: Arc<Notify>,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskQueue {
    /// Create a new queue with its own gate.
    pub fn new(config: QueueConfig) -> Self {
        let gate = Gate::new(config.gate_capacity);
        Self::with_gate(config, gate)
    }

    /// Create a queue whose tasks share an existing gate.
    ///
    /// `config.gate_capacity` is ignored; the gate brings its own.
    pub fn with_gate(config: QueueConfig, gate: Gate) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            id: Uuid::new_v4(),
            config,
            gate,
            inner: Mutex::new(QueueInner {
                state: QueueState::Idle,
                entries: Vec::new(),
                ids: HashSet::new(),
                on_all_finished: Vec::new(),
                retired: QueueSummary::default(),
            }),
            wake: Arc::new(Notify::new()),
            events,
        }
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// The gate injected into tasks that were built without one.
    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn state(&self) -> QueueState {
        self.inner.lock().state
    }

    /// Submit a task that runs once every task in `dependencies` has finished.
    ///
    /// All edges are checked before any is recorded; on error neither the
    /// queue nor the task changes. Dependencies do not have to belong to this
    /// queue, but a dependency nobody ever starts keeps its dependents pending.
    pub fn add_task(&self, task: Task, dependencies: &[Task]) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if inner.ids.contains(&task.id()) {
            return Err(QueueError::DuplicateTask { id: task.id() });
        }

        task.add_dependencies(dependencies)?;

        task.inject_gate(&self.gate);
        if let Some(timeout) = self.config.default_timeout {
            task.inject_default_timeout(timeout);
        }
        task.attach(self.observer(true));
        self.watch_dependencies(&inner, &task);

        tracing::debug!(
            queue = %self.config.name,
            task_id = %task.id(),
            dependencies = dependencies.len(),
            "Task added to queue"
        );

        inner.ids.insert(task.id());
        inner.entries.push(Entry {
            task,
            dispatched: false,
        });
        inner.state = match inner.state {
            QueueState::Draining => QueueState::Running,
            QueueState::Completed => QueueState::Idle,
            state => state,
        };
        drop(inner);

        self.wake.notify_one();
        Ok(())
    }

    /// Make `task`, already in the queue, wait for `dependency`.
    pub fn add_dependency(&self, task: &Task, dependency: &Task) -> Result<(), QueueError> {
        let inner = self.inner.lock();
        if !inner.ids.contains(&task.id()) {
            return Err(QueueError::UnknownTask { id: task.id() });
        }

        task.add_dependency(dependency)?;
        self.watch_dependencies(&inner, task);
        drop(inner);

        self.wake.notify_one();
        Ok(())
    }

    /// Submit a task that runs `callback` once every task submitted so far has
    /// finished, however they finished.
    pub fn add_barrier<F>(&self, callback: F) -> Result<Task, QueueError>
    where
        F: FnOnce() + Send + 'static,
    {
        let dependencies = self.tasks();
        let barrier = Task::builder(move |done| {
            callback();
            done.complete();
        })
        .name(format!("{}-barrier", self.config.name))
        .build();

        self.add_task(barrier.clone(), &dependencies)?;
        Ok(barrier)
    }

    /// Register a callback for the end of the current (or next) run cycle.
    ///
    /// It fires exactly once, after every submitted task is `Finished`.
    pub fn on_all_finished<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.lock().on_all_finished.push(Box::new(callback));
    }

    /// Dispatch tasks until every submitted task has finished.
    ///
    /// A task is dispatched when it is not cancelled, all its dependencies are
    /// `Finished`, and fewer than `max_concurrency` tasks are in flight. Ties
    /// go to the earlier submission. Each dispatched task starts on its own
    /// tokio task, so a task waiting on the gate never stalls the loop.
    pub async fn run(&self) -> Result<(), QueueError> {
        let total = {
            let mut inner = self.inner.lock();
            if inner.state.is_active() {
                return Err(QueueError::AlreadyRunning {
                    name: self.config.name.clone(),
                });
            }
            inner.state = QueueState::Running;
            inner.entries.len()
        };

        tracing::info!(
            queue = %self.config.name,
            tasks = total,
            max_concurrency = self.config.max_concurrency.get(),
            gate_capacity = self.gate.capacity(),
            "Queue started"
        );

        loop {
            match self.dispatch_ready() {
                // Permits stored by `notify_one` carry wakeups that land mid-scan.
                Pass::Busy => self.wake.notified().await,
                Pass::Finished(callbacks) => {
                    if self.fire_callbacks(callbacks) {
                        break;
                    }
                    tracing::debug!(queue = %self.config.name, "Tasks added during completion, resuming");
                }
            }
        }

        tracing::info!(queue = %self.config.name, "Queue completed");
        Ok(())
    }

    /// Fire the all-finished callbacks while the queue stays `Draining`.
    ///
    /// A task submitted meanwhile puts the queue back to `Running`; the
    /// callbacks that have not fired yet then wait for it. Returns true once
    /// all fired and the queue is `Completed`.
    fn fire_callbacks(&self, callbacks: Vec<FinishedCallback>) -> bool {
        let mut remaining = callbacks.into_iter();
        loop {
            {
                let mut inner = self.inner.lock();
                if !inner.entries.is_empty() {
                    let mut rest: Vec<FinishedCallback> = remaining.collect();
                    rest.append(&mut inner.on_all_finished);
                    inner.on_all_finished = rest;
                    inner.state = QueueState::Running;
                    return false;
                }
                if remaining.as_slice().is_empty() {
                    inner.state = QueueState::Completed;
                    return true;
                }
            }
            if let Some(callback) = remaining.next() {
                callback();
            }
        }
    }

    /// Run the queue on a tokio task.
    pub fn spawn_run(self: &Arc<Self>) -> JoinHandle<Result<(), QueueError>> {
        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.run().await })
    }

    /// One scheduling pass.
    ///
    /// When every task has finished, the same critical section retires them
    /// and takes the callbacks, leaving the queue `Draining` until they fire.
    fn dispatch_ready(&self) -> Pass {
        let max = self.config.max_concurrency.get();
        let mut inner = self.inner.lock();

        let mut in_flight = inner
            .entries
            .iter()
            .filter(|e| {
                let state = e.task.state();
                state == TaskState::Running || (e.dispatched && state == TaskState::Pending)
            })
            .count();

        let mut to_start = Vec::new();
        let mut unfinished = 0;
        let mut waiting = 0;

        for entry in inner.entries.iter_mut() {
            let state = entry.task.state();
            if state.is_terminal() {
                continue;
            }
            unfinished += 1;
            if entry.dispatched || state != TaskState::Pending {
                continue;
            }
            if in_flight < max && entry.task.is_ready() {
                entry.dispatched = true;
                in_flight += 1;
                to_start.push(entry.task.clone());
            } else {
                waiting += 1;
            }
        }

        if unfinished == 0 {
            Self::retire(&mut inner);
            inner.state = QueueState::Draining;
            return Pass::Finished(std::mem::take(&mut inner.on_all_finished));
        }
        if waiting == 0 && inner.state == QueueState::Running {
            inner.state = QueueState::Draining;
        }
        drop(inner);

        for task in to_start {
            tracing::debug!(queue = %self.config.name, task_id = %task.id(), "Dispatching task");
            tokio::spawn(async move { task.start().await });
        }

        Pass::Busy
    }

    /// Drop finished tasks, keeping only their counts.
    fn retire(inner: &mut QueueInner) {
        let cycle = Self::count(&inner.entries);
        inner.retired.total += cycle.total;
        inner.retired.finished += cycle.finished;
        inner.retired.cancelled += cycle.cancelled;
        inner.entries.clear();
        inner.ids.clear();
    }

    /// Cancel every task that has not finished yet.
    ///
    /// Never blocks: running bodies are not interrupted, their tasks are just
    /// forced to `Finished` and their permits returned.
    pub fn cancel_all(&self) {
        let tasks: Vec<Task> = {
            let mut inner = self.inner.lock();
            if inner.state == QueueState::Running {
                inner.state = QueueState::Draining;
            }
            inner.entries.iter().map(|e| e.task.clone()).collect()
        };

        let mut cancelled = 0;
        for task in tasks.iter().filter(|t| !t.is_finished()) {
            task.cancel();
            cancelled += 1;
        }

        tracing::info!(queue = %self.config.name, cancelled, "Cancelled all tasks");
        self.wake.notify_one();
    }

    /// Subscribe to transitions of every task in the queue.
    ///
    /// Slow subscribers miss events (and get `RecvError::Lagged`); emitters
    /// never wait for them.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Transitions of every task in the queue as a stream. Lag is skipped.
    pub fn events(&self) -> impl Stream<Item = TaskEvent> + Send + 'static {
        let name = self.config.name.clone();
        BroadcastStream::new(self.subscribe()).filter_map(move |item| match item {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(queue = %name, skipped, "Event subscriber lagged");
                None
            }
        })
    }

    /// Tasks of the current cycle, in submission order.
    ///
    /// Tasks are released once the cycle they ran in completes.
    pub fn tasks(&self) -> Vec<Task> {
        self.inner.lock().entries.iter().map(|e| e.task.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Number of tasks currently `Running`.
    pub fn running_count(&self) -> usize {
        self.count_in(TaskState::Running)
    }

    /// Number of tasks not started yet.
    pub fn pending_count(&self) -> usize {
        self.count_in(TaskState::Pending)
    }

    fn count_in(&self, state: TaskState) -> usize {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.task.state() == state)
            .count()
    }

    /// Counts of tasks by state, including those of completed cycles.
    pub fn summary(&self) -> QueueSummary {
        let inner = self.inner.lock();
        let live = Self::count(&inner.entries);
        QueueSummary {
            total: inner.retired.total + live.total,
            pending: live.pending,
            running: live.running,
            finished: inner.retired.finished + live.finished,
            cancelled: inner.retired.cancelled + live.cancelled,
        }
    }

    fn count(entries: &[Entry]) -> QueueSummary {
        let mut summary = QueueSummary::default();
        for entry in entries {
            match entry.task.state() {
                TaskState::Pending => summary.pending += 1,
                TaskState::Running => summary.running += 1,
                TaskState::Finished => {
                    summary.finished += 1;
                    if entry.task.outcome() != Some(TaskOutcome::Completed) {
                        summary.cancelled += 1;
                    }
                }
            }
        }

        summary.total = entries.len();
        summary
    }

    fn observer(&self, with_events: bool) -> Observer {
        Observer {
            id: self.id,
            events: with_events.then(|| self.events.clone()),
            wake: Arc::clone(&self.wake),
        }
    }

    /// Make sure finishing dependencies outside the queue still wake the
    /// dispatcher. Tasks inside the queue are already observed.
    fn watch_dependencies(&self, inner: &QueueInner, task: &Task) {
        for dependency in task.dependencies() {
            if !inner.ids.contains(&dependency.id()) && dependency != *task {
                dependency.attach(self.observer(false));
            }
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .field("summary", &self.summary())
            .finish()
    }
}
