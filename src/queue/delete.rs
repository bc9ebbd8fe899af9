//! Delete handler: one delete-object call per task.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio_util::sync::CancellationToken;

use super::handler::TaskHandler;
use super::types::{Lifecycle, SharedTask, Task, TaskStatus};
use crate::client::ObjectStore;
use crate::error::TransferError;

/// Error classes no retry will fix for a delete.
const NON_RETRYABLE: &[&str] = &[
    "access denied",
    "forbidden",
    "invalid credentials",
    "bucket not found",
    "key not found",
];

pub struct DeleteHandler {
    max_retries: u32,
}

impl DeleteHandler {
    pub fn new(max_retries: u32) -> Self {
        DeleteHandler { max_retries }
    }
}

#[async_trait]
impl TaskHandler for DeleteHandler {
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle {
            pending: TaskStatus::Pending,
            running: TaskStatus::Running,
            completed: TaskStatus::Completed,
            failed: TaskStatus::Failed,
            canceled: TaskStatus::Canceled,
            paused: None,
        }
    }

    async fn perform(
        &self,
        task: SharedTask,
        store: Arc<dyn ObjectStore>,
        cancel: CancellationToken,
    ) -> Result<(), TransferError> {
        let (task_id, bucket, object_key) = {
            let guard = task.lock().unwrap();
            let spec = guard
                .as_delete()
                .ok_or_else(|| TransferError::service("delete handler given a non-delete task"))?;
            (
                guard.id.clone(),
                spec.bucket.clone(),
                format!("{}{}", spec.prefix, spec.key),
            )
        };

        debug!("delete_start: {} {}/{}", task_id, bucket, object_key);
        store.delete_object(&bucket, &object_key, &cancel).await?;

        let mut guard = task.lock().unwrap();
        guard.progress = 100;
        Ok(())
    }

    fn should_retry(&self, task: &Task, err: &TransferError) -> bool {
        if self.is_canceled_error(err) || task.retry_count >= self.max_retries {
            return false;
        }
        !err.message_matches_any(NON_RETRYABLE)
    }

    fn is_canceled_error(&self, err: &TransferError) -> bool {
        matches!(err, TransferError::Canceled) || err.message_matches_any(&["cancel", "abort"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> DeleteHandler {
        DeleteHandler::new(3)
    }

    fn task() -> Task {
        Task::delete("b1", "a.txt", "")
    }

    #[test]
    fn transient_errors_are_retryable() {
        let err = TransferError::service("connection reset by peer");
        assert!(handler().should_retry(&task(), &err));
    }

    #[test]
    fn permission_and_existence_errors_are_not_retryable() {
        let handler = handler();
        let task = task();
        for message in [
            "access denied",
            "Forbidden",
            "invalid credentials",
            "bucket not found",
            "key not found",
        ] {
            assert!(
                !handler.should_retry(&task, &TransferError::service(message)),
                "{message} should not be retried"
            );
        }
    }

    #[test]
    fn retry_budget_exhaustion_stops_retries() {
        let mut task = task();
        task.retry_count = 3;
        let err = TransferError::service("connection reset by peer");
        assert!(!handler().should_retry(&task, &err));
    }

    #[test]
    fn cancellation_is_recognized_by_variant_and_text() {
        let handler = handler();
        assert!(handler.is_canceled_error(&TransferError::Canceled));
        assert!(handler.is_canceled_error(&TransferError::service("request aborted")));
        assert!(!handler.is_canceled_error(&TransferError::service("timed out")));
    }

    #[test]
    fn delete_lifecycle_has_no_paused_state() {
        assert!(handler().lifecycle().paused.is_none());
    }
}
