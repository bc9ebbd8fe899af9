//! Per-kind handler contract the scheduler drives tasks through.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::types::{Lifecycle, SharedTask, Task};
use crate::client::ObjectStore;
use crate::error::TransferError;

/// Verdict from a handler's error intercept hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOutcome {
    /// Requeue the task for another attempt.
    Retry,
    /// The handler resolved the error itself (e.g. parked the task as
    /// paused); skip the standard retry/cancel/fail classification.
    Handled,
    /// Terminal failure.
    Fail,
}

/// Strategy implementing execution, retry classification, and cancellation
/// recognition for one task kind. Handlers write progress and upload state
/// back onto the exact task instance they were given, never another task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Status vocabulary for this kind.
    fn lifecycle(&self) -> Lifecycle;

    /// Executes the task. Failures never escape the scheduler; every error
    /// is classified before the next scheduling cycle.
    async fn perform(
        &self,
        task: SharedTask,
        store: Arc<dyn ObjectStore>,
        cancel: CancellationToken,
    ) -> Result<(), TransferError>;

    /// Whether the error is worth another attempt for this task.
    fn should_retry(&self, task: &Task, err: &TransferError) -> bool;

    /// Optional intercept before the standard classification.
    fn handle_error(&self, _task: &mut Task, _err: &TransferError) -> Option<ErrorOutcome> {
        None
    }

    /// Whether the error signals an abort of the task's token.
    fn is_canceled_error(&self, err: &TransferError) -> bool;
}
