//! Task model, status vocabulary, and event payloads for the transfer queue.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client::CompletedPart;

/// Default concurrent transfer slots.
pub const DEFAULT_MAX_CONCURRENCY: usize = 6;
/// Default retry ceiling per task.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default chunk size (5 MiB). Files at or below this go out as a single
/// PUT; larger files are split into chunks of this size.
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
    Paused,
}

impl TaskStatus {
    /// Active statuses keep the registry from draining.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Running | TaskStatus::Paused
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Canceled => write!(f, "canceled"),
            TaskStatus::Paused => write!(f, "paused"),
        }
    }
}

/// Status vocabulary for one task kind. The scheduler never hardcodes a
/// status; it reads the value for the transition it is making from the
/// handler's lifecycle table. `paused` exists only for kinds that support it.
#[derive(Debug, Clone, Copy)]
pub struct Lifecycle {
    pub pending: TaskStatus,
    pub running: TaskStatus,
    pub completed: TaskStatus,
    pub failed: TaskStatus,
    pub canceled: TaskStatus,
    pub paused: Option<TaskStatus>,
}

#[derive(Debug, Clone)]
pub struct DeleteSpec {
    pub bucket: String,
    pub key: String,
    pub prefix: String,
}

#[derive(Debug, Clone)]
pub struct UploadSpec {
    /// Payload file on the local filesystem, read per part on upload.
    pub path: PathBuf,
    pub bucket: String,
    pub key: String,
    /// Present once a multipart session has been opened; cleared when the
    /// session completes or is aborted.
    pub upload_id: Option<String>,
    /// Parts already uploaded, unique by part number. Exactly what is needed
    /// to resume without re-uploading.
    pub completed_parts: Vec<CompletedPart>,
    /// Set by `pause_task` just before the token is revoked, so the handler
    /// can tell a pause from a cancel.
    pub pause_requested: bool,
}

/// Discriminant payload of a task.
#[derive(Debug, Clone)]
pub enum TaskKind {
    Delete(DeleteSpec),
    Upload(UploadSpec),
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Delete(_) => "delete",
            TaskKind::Upload(_) => "upload",
        }
    }
}

/// A unit of background work tracked by the queue.
///
/// Mutated only by the scheduler and, while running, by the handler the
/// scheduler gave it to. A handler never touches another task.
#[derive(Debug)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub retry_count: u32,
    /// Live only while the task is running; the scheduler holds the
    /// authoritative reference.
    pub(crate) cancel: Option<CancellationToken>,
    /// Retry-backoff gate; the pump skips the task until this instant.
    pub(crate) eligible_at: Option<Instant>,
    pub kind: TaskKind,
}

pub type SharedTask = Arc<Mutex<Task>>;

impl Task {
    fn new(kind: TaskKind) -> Self {
        Task {
            id: Uuid::new_v4().to_string(),
            status: TaskStatus::Pending,
            progress: 0,
            error: None,
            retry_count: 0,
            cancel: None,
            eligible_at: None,
            kind,
        }
    }

    pub fn delete(
        bucket: impl Into<String>,
        key: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Task::new(TaskKind::Delete(DeleteSpec {
            bucket: bucket.into(),
            key: key.into(),
            prefix: prefix.into(),
        }))
    }

    pub fn upload(
        bucket: impl Into<String>,
        key: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Task::new(TaskKind::Upload(UploadSpec {
            path: path.into(),
            bucket: bucket.into(),
            key: key.into(),
            upload_id: None,
            completed_parts: Vec::new(),
            pause_requested: false,
        }))
    }

    pub(crate) fn shared(self) -> SharedTask {
        Arc::new(Mutex::new(self))
    }

    pub(crate) fn as_delete(&self) -> Option<&DeleteSpec> {
        match &self.kind {
            TaskKind::Delete(spec) => Some(spec),
            _ => None,
        }
    }

    pub(crate) fn as_upload(&self) -> Option<&UploadSpec> {
        match &self.kind {
            TaskKind::Upload(spec) => Some(spec),
            _ => None,
        }
    }

    pub(crate) fn as_upload_mut(&mut self) -> Option<&mut UploadSpec> {
        match &mut self.kind {
            TaskKind::Upload(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let (bucket, key, upload_id, completed_parts) = match &self.kind {
            TaskKind::Delete(spec) => (spec.bucket.clone(), spec.key.clone(), None, 0),
            TaskKind::Upload(spec) => (
                spec.bucket.clone(),
                spec.key.clone(),
                spec.upload_id.clone(),
                spec.completed_parts.len(),
            ),
        };
        TaskSnapshot {
            task_id: self.id.clone(),
            kind: self.kind.label(),
            bucket,
            key,
            status: self.status,
            progress: self.progress,
            error: self.error.clone(),
            retry_count: self.retry_count,
            upload_id,
            completed_parts,
        }
    }
}

/// Read-only view of a task for display.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub kind: &'static str,
    pub bucket: String,
    pub key: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    pub completed_parts: usize,
}

/// Lifecycle event emitted by the queue.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TaskEvent {
    Enqueued { task_id: String },
    Running { task_id: String },
    Completed { task_id: String },
    Failed { task_id: String, error: String },
    Canceled { task_id: String },
    /// A non-empty registry settled with no task left in an active state.
    /// Fires once per drain cycle and re-arms on the next enqueue.
    Drained,
}
