//! Transfer queue scheduler: registry, bounded concurrency, retries,
//! cancellation, and lifecycle events.
//!
//! Scheduling is wake-on-state-change: enqueue, task settle, and resume all
//! send a signal to a queue worker, which pulls pending tasks into free pool
//! slots. There is no periodic polling; the only timer is the one-shot wake
//! armed for the soonest retry-backoff expiry.

use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use super::delete::DeleteHandler;
use super::handler::{ErrorOutcome, TaskHandler};
use super::types::{
    SharedTask, Task, TaskEvent, TaskKind, TaskSnapshot, TaskStatus, DEFAULT_CHUNK_SIZE,
    DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_RETRIES,
};
use super::upload::UploadHandler;
use crate::client::ObjectStore;
use crate::error::TransferError;

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub max_concurrency: usize,
    pub max_retries: u32,
    /// Linear backoff unit: a task's nth retry waits `n * retry_base_delay`.
    pub retry_base_delay: Duration,
    pub chunk_size: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_millis(500),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

struct ManagerState {
    /// Insertion-ordered registry; earliest pending task wins a free slot.
    tasks: Vec<SharedTask>,
    active_count: usize,
    started: bool,
    drained_armed: bool,
}

struct ManagerInner {
    store: Arc<dyn ObjectStore>,
    config: ManagerConfig,
    state: Mutex<ManagerState>,
    events: broadcast::Sender<TaskEvent>,
    wake: mpsc::Sender<()>,
    delete_handler: DeleteHandler,
    upload_handler: UploadHandler,
}

/// Owns the task registry and drives tasks through their handlers under a
/// bounded concurrency pool. Cheap to clone; all clones share one queue.
///
/// Must be created inside a Tokio runtime: the constructor spawns the queue
/// worker. State is session-lifetime only; nothing survives a restart.
#[derive(Clone)]
pub struct TransferManager {
    inner: Arc<ManagerInner>,
}

impl TransferManager {
    pub fn new(store: Arc<dyn ObjectStore>, config: ManagerConfig) -> Self {
        let (wake, receiver) = mpsc::channel(8);
        let (events, _) = broadcast::channel(256);
        let inner = Arc::new(ManagerInner {
            delete_handler: DeleteHandler::new(config.max_retries),
            upload_handler: UploadHandler::new(config.max_retries, config.chunk_size),
            store,
            config,
            state: Mutex::new(ManagerState {
                tasks: Vec::new(),
                active_count: 0,
                started: true,
                drained_armed: false,
            }),
            events,
            wake,
        });
        tokio::spawn(run_queue_worker(Arc::downgrade(&inner), receiver));
        TransferManager { inner }
    }

    /// Subscribes to lifecycle events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    /// Adds tasks as pending and triggers a scheduling pass. Never blocks on
    /// the pool; returns the assigned task ids.
    pub fn enqueue(&self, tasks: Vec<Task>) -> Vec<String> {
        let mut ids = Vec::with_capacity(tasks.len());
        {
            let mut state = self.inner.state.lock().unwrap();
            for task in tasks {
                ids.push(task.id.clone());
                state.tasks.push(task.shared());
            }
            state.drained_armed = true;
        }
        for id in &ids {
            info!("task_enqueued: {}", id);
            self.inner.emit(TaskEvent::Enqueued {
                task_id: id.clone(),
            });
        }
        self.inner.signal();
        ids
    }

    pub fn enqueue_upload(
        &self,
        bucket: impl Into<String>,
        key: impl Into<String>,
        path: impl Into<std::path::PathBuf>,
    ) -> String {
        self.enqueue(vec![Task::upload(bucket, key, path)]).remove(0)
    }

    pub fn enqueue_delete(
        &self,
        bucket: impl Into<String>,
        key: impl Into<String>,
        prefix: impl Into<String>,
    ) -> String {
        self.enqueue(vec![Task::delete(bucket, key, prefix)]).remove(0)
    }

    /// Resumes pulling pending tasks.
    pub fn start(&self) {
        self.inner.state.lock().unwrap().started = true;
        info!("queue_started");
        self.inner.signal();
    }

    /// Stops pulling pending tasks. Never cancels in-flight tasks.
    pub fn stop(&self) {
        self.inner.state.lock().unwrap().started = false;
        info!("queue_stopped");
    }

    /// Cancels every active task: pending and paused tasks go straight to
    /// canceled; running tasks have their token revoked and settle as
    /// canceled once the handler observes the abort.
    pub fn cancel_all(&self) {
        let (events, drained) = {
            let mut state = self.inner.state.lock().unwrap();
            let mut events = Vec::new();
            for task in &state.tasks {
                if let Some(event) = self.inner.cancel_one(task) {
                    events.push(event);
                }
            }
            let drained = check_drained(&mut state);
            (events, drained)
        };
        info!("queue_cancel_all: {} canceled immediately", events.len());
        for event in events {
            self.inner.emit(event);
        }
        if drained {
            self.inner.emit(TaskEvent::Drained);
        }
    }

    /// Cancels one task. Returns false for unknown ids.
    pub fn cancel_task(&self, id: &str) -> bool {
        let (found, event, drained) = {
            let mut state = self.inner.state.lock().unwrap();
            let Some(task) = find_task(&state, id) else {
                return false;
            };
            let event = self.inner.cancel_one(&task);
            let drained = check_drained(&mut state);
            (true, event, drained)
        };
        info!("task_cancel: {}", id);
        if let Some(event) = event {
            self.inner.emit(event);
        }
        if drained {
            self.inner.emit(TaskEvent::Drained);
        }
        found
    }

    /// Cancels (if active) and evicts one task. Returns false for unknown ids.
    pub fn remove_task(&self, id: &str) -> bool {
        let (event, drained) = {
            let mut state = self.inner.state.lock().unwrap();
            let Some(index) = state
                .tasks
                .iter()
                .position(|task| task.lock().unwrap().id == id)
            else {
                return false;
            };
            let task = state.tasks.remove(index);
            let event = self.inner.cancel_one(&task);
            let drained = check_drained(&mut state);
            (event, drained)
        };
        info!("task_remove: {}", id);
        if let Some(event) = event {
            self.inner.emit(event);
        }
        if drained {
            self.inner.emit(TaskEvent::Drained);
        }
        true
    }

    /// Cancels everything, empties the registry, resets counters.
    pub fn clear_tasks(&self) {
        let (events, evicted) = {
            let mut state = self.inner.state.lock().unwrap();
            let mut events = Vec::new();
            for task in &state.tasks {
                if let Some(event) = self.inner.cancel_one(task) {
                    events.push(event);
                }
            }
            let evicted = state.tasks.len();
            state.tasks.clear();
            state.active_count = 0;
            state.drained_armed = false;
            (events, evicted)
        };
        info!("queue_cleared: {} tasks evicted", evicted);
        for event in events {
            self.inner.emit(event);
        }
    }

    /// Requests a pause for an upload task: sets the pause flag, then revokes
    /// the running token so the handler parks the task as paused. A pending
    /// upload is parked directly. Returns false for unknown ids, non-upload
    /// tasks, and tasks in a state that cannot pause.
    pub fn pause_task(&self, id: &str) -> bool {
        let state = self.inner.state.lock().unwrap();
        let Some(task) = find_task(&state, id) else {
            return false;
        };
        let mut guard = task.lock().unwrap();
        if !matches!(guard.kind, TaskKind::Upload(_)) {
            return false;
        }
        match guard.status {
            TaskStatus::Running => {
                if let Some(spec) = guard.as_upload_mut() {
                    spec.pause_requested = true;
                }
                if let Some(cancel) = &guard.cancel {
                    cancel.cancel();
                }
                info!("task_pause: {} (running, token revoked)", id);
                true
            }
            TaskStatus::Pending => {
                guard.status = TaskStatus::Paused;
                guard.eligible_at = None;
                info!("task_pause: {} (pending, parked)", id);
                true
            }
            _ => false,
        }
    }

    /// Re-enqueues a paused upload as pending; the multipart loop continues
    /// from the first missing part. Returns false unless the task is paused.
    pub fn resume_task(&self, id: &str) -> bool {
        let resumed = {
            let mut state = self.inner.state.lock().unwrap();
            let Some(task) = find_task(&state, id) else {
                return false;
            };
            let mut guard = task.lock().unwrap();
            if guard.status != TaskStatus::Paused {
                return false;
            }
            guard.status = TaskStatus::Pending;
            guard.error = None;
            guard.eligible_at = None;
            if let Some(spec) = guard.as_upload_mut() {
                spec.pause_requested = false;
            }
            drop(guard);
            state.drained_armed = true;
            true
        };
        info!("task_resume: {}", id);
        self.inner.signal();
        resumed
    }

    /// Puts a failed or canceled task back to pending for a fresh run,
    /// clearing its error and retry budget. Returns false otherwise.
    pub fn reset_task(&self, id: &str) -> bool {
        {
            let mut state = self.inner.state.lock().unwrap();
            let Some(task) = find_task(&state, id) else {
                return false;
            };
            let mut guard = task.lock().unwrap();
            if !matches!(guard.status, TaskStatus::Failed | TaskStatus::Canceled) {
                return false;
            }
            guard.status = TaskStatus::Pending;
            guard.progress = 0;
            guard.error = None;
            guard.retry_count = 0;
            guard.eligible_at = None;
            drop(guard);
            state.drained_armed = true;
        }
        info!("task_reset: {}", id);
        self.inner.signal();
        true
    }

    /// Snapshots of every task, in enqueue order.
    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        let state = self.inner.state.lock().unwrap();
        state
            .tasks
            .iter()
            .map(|task| task.lock().unwrap().snapshot())
            .collect()
    }

    pub fn task(&self, id: &str) -> Option<TaskSnapshot> {
        let state = self.inner.state.lock().unwrap();
        find_task(&state, id).map(|task| task.lock().unwrap().snapshot())
    }

    /// Tasks currently holding a pool slot.
    pub fn active_count(&self) -> usize {
        self.inner.state.lock().unwrap().active_count
    }
}

impl ManagerInner {
    fn handler_for_kind<'a>(&'a self, kind: &TaskKind) -> &'a dyn TaskHandler {
        match kind {
            TaskKind::Upload(_) => &self.upload_handler,
            TaskKind::Delete(_) => &self.delete_handler,
        }
    }

    fn emit(&self, event: TaskEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn signal(&self) {
        // A full channel means a pass is already scheduled.
        if self.wake.try_send(()).is_err() {
            debug!("queue_signal: pass already scheduled");
        }
    }

    /// Moves a pending or paused task straight to canceled, or revokes a
    /// running task's token. Returns the event to emit, if any; a running
    /// task emits later, when its handler observes the abort.
    fn cancel_one(&self, task: &SharedTask) -> Option<TaskEvent> {
        let mut guard = task.lock().unwrap();
        let lifecycle = self.handler_for_kind(&guard.kind).lifecycle();
        match guard.status {
            TaskStatus::Pending | TaskStatus::Paused => {
                guard.status = lifecycle.canceled;
                guard.eligible_at = None;
                Some(TaskEvent::Canceled {
                    task_id: guard.id.clone(),
                })
            }
            TaskStatus::Running => {
                if let Some(cancel) = &guard.cancel {
                    cancel.cancel();
                }
                None
            }
            _ => None,
        }
    }
}

fn find_task(state: &ManagerState, id: &str) -> Option<SharedTask> {
    state
        .tasks
        .iter()
        .find(|task| task.lock().unwrap().id == id)
        .cloned()
}

/// True exactly once per drain cycle: a non-empty registry with no task in
/// an active state. Re-armed by enqueue (and resume).
fn check_drained(state: &mut ManagerState) -> bool {
    if !state.drained_armed || state.tasks.is_empty() || state.active_count > 0 {
        return false;
    }
    let any_active = state
        .tasks
        .iter()
        .any(|task| task.lock().unwrap().status.is_active());
    if any_active {
        return false;
    }
    state.drained_armed = false;
    info!("queue_drained");
    true
}

/// Queue worker: collapses signal bursts into single scheduling passes.
/// Exits when the manager is dropped.
async fn run_queue_worker(inner: Weak<ManagerInner>, mut receiver: mpsc::Receiver<()>) {
    while receiver.recv().await.is_some() {
        while receiver.try_recv().is_ok() {}
        let Some(inner) = inner.upgrade() else { break };
        pump(&inner);
    }
}

/// One scheduling pass: fill free pool slots with the earliest eligible
/// pending tasks, then arm a one-shot wake if any pending task is still
/// waiting out its retry backoff.
fn pump(inner: &Arc<ManagerInner>) {
    let mut to_start: Vec<(SharedTask, String, CancellationToken)> = Vec::new();
    let mut next_wake: Option<Duration> = None;
    {
        let mut state = inner.state.lock().unwrap();
        if !state.started {
            return;
        }
        let now = Instant::now();
        while state.active_count < inner.config.max_concurrency {
            let mut candidate = None;
            for task in &state.tasks {
                let guard = task.lock().unwrap();
                let lifecycle = inner.handler_for_kind(&guard.kind).lifecycle();
                if guard.status != lifecycle.pending {
                    continue;
                }
                match guard.eligible_at {
                    Some(at) if at > now => {
                        let delay = at - now;
                        next_wake = Some(next_wake.map_or(delay, |d| d.min(delay)));
                    }
                    _ => {
                        candidate = Some(task.clone());
                        break;
                    }
                }
            }
            let Some(task) = candidate else { break };
            {
                let mut guard = task.lock().unwrap();
                let lifecycle = inner.handler_for_kind(&guard.kind).lifecycle();
                guard.status = lifecycle.running;
                guard.eligible_at = None;
                let token = CancellationToken::new();
                guard.cancel = Some(token.clone());
                to_start.push((task.clone(), guard.id.clone(), token));
            }
            state.active_count += 1;
        }
        debug!(
            "queue_check: active={} slots={}",
            state.active_count,
            inner
                .config
                .max_concurrency
                .saturating_sub(state.active_count)
        );
    }

    for (task, task_id, token) in to_start {
        info!("task_running: {}", task_id);
        inner.emit(TaskEvent::Running {
            task_id: task_id.clone(),
        });
        let inner = inner.clone();
        tokio::spawn(async move {
            run_task(inner, task, token).await;
        });
    }

    if let Some(delay) = next_wake {
        let wake = inner.wake.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = wake.send(()).await;
        });
    }
}

async fn run_task(inner: Arc<ManagerInner>, task: SharedTask, cancel: CancellationToken) {
    let handler = {
        let guard = task.lock().unwrap();
        inner.handler_for_kind(&guard.kind)
    };
    let result = handler
        .perform(task.clone(), inner.store.clone(), cancel)
        .await;
    settle(&inner, &task, handler, result);
}

enum Disposition {
    Completed,
    Handled,
    Retry,
    Canceled,
    Failed(String),
}

/// Funnels every exit path of `perform` into exactly one transition, then
/// releases the pool slot and re-invokes the scheduling loop.
fn settle(
    inner: &Arc<ManagerInner>,
    task: &SharedTask,
    handler: &dyn TaskHandler,
    result: Result<(), TransferError>,
) {
    let lifecycle = handler.lifecycle();
    let mut event = None;
    {
        let mut guard = task.lock().unwrap();
        guard.cancel = None;

        let disposition = match result {
            Ok(()) if guard.status == lifecycle.running => Disposition::Completed,
            // Status moved out from under a successful perform (e.g. the
            // task was evicted mid-flight): nothing left to transition.
            Ok(()) => Disposition::Handled,
            Err(err) => match handler.handle_error(&mut guard, &err) {
                Some(ErrorOutcome::Handled) => Disposition::Handled,
                Some(ErrorOutcome::Retry) => Disposition::Retry,
                Some(ErrorOutcome::Fail) => Disposition::Failed(err.to_string()),
                None if handler.is_canceled_error(&err) => Disposition::Canceled,
                None if guard.retry_count < inner.config.max_retries
                    && handler.should_retry(&guard, &err) =>
                {
                    Disposition::Retry
                }
                None => Disposition::Failed(err.to_string()),
            },
        };

        // A pause request that lost the race to another outcome must not
        // leak into the next attempt.
        if !matches!(disposition, Disposition::Handled) {
            if let Some(spec) = guard.as_upload_mut() {
                spec.pause_requested = false;
            }
        }

        match disposition {
            Disposition::Completed => {
                guard.status = lifecycle.completed;
                guard.progress = 100;
                info!("task_completed: {}", guard.id);
                event = Some(TaskEvent::Completed {
                    task_id: guard.id.clone(),
                });
            }
            Disposition::Canceled => {
                guard.status = lifecycle.canceled;
                info!("task_canceled: {}", guard.id);
                event = Some(TaskEvent::Canceled {
                    task_id: guard.id.clone(),
                });
            }
            Disposition::Failed(message) => {
                guard.status = lifecycle.failed;
                guard.error = Some(message.clone());
                warn!("task_failed: {} error={}", guard.id, message);
                event = Some(TaskEvent::Failed {
                    task_id: guard.id.clone(),
                    error: message,
                });
            }
            Disposition::Retry => {
                guard.retry_count += 1;
                guard.status = lifecycle.pending;
                guard.progress = 0;
                guard.error = None;
                let delay = inner.config.retry_base_delay * guard.retry_count;
                guard.eligible_at = Some(Instant::now() + delay);
                info!(
                    "task_retry: {} attempt={} delay_ms={}",
                    guard.id,
                    guard.retry_count,
                    delay.as_millis()
                );
            }
            Disposition::Handled => {}
        }
    }

    if let Some(event) = event {
        inner.emit(event);
    }

    let drained = {
        let mut state = inner.state.lock().unwrap();
        state.active_count = state.active_count.saturating_sub(1);
        check_drained(&mut state)
    };
    if drained {
        inner.emit(TaskEvent::Drained);
    }
    inner.signal();
}
