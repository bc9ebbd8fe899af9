//! Upload handler: single-shot PUT below the chunk threshold, resumable
//! multipart state machine above it.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, warn};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

use super::handler::{ErrorOutcome, TaskHandler};
use super::types::{Lifecycle, SharedTask, Task, TaskStatus};
use crate::client::{CompletedPart, ObjectStore};
use crate::error::TransferError;

/// Error classes no retry will fix for an upload.
const NON_RETRYABLE: &[&str] = &[
    "access denied",
    "forbidden",
    "invalid credentials",
    "bucket not found",
    "file not found",
];

pub struct UploadHandler {
    max_retries: u32,
    /// Part size; doubles as the single-shot PUT threshold.
    chunk_size: u64,
}

impl UploadHandler {
    pub fn new(max_retries: u32, chunk_size: u64) -> Self {
        UploadHandler {
            max_retries,
            chunk_size,
        }
    }

    async fn read_range(path: &Path, start: u64, len: u64) -> Result<Bytes, TransferError> {
        let mut file = File::open(path).await?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut buffer = vec![0u8; len as usize];
        file.read_exact(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }

    async fn file_size(path: &Path) -> Result<u64, TransferError> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) => Ok(metadata.len()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(TransferError::service(
                format!("file not found: {}", path.display()),
            )),
            Err(err) => Err(TransferError::Io(err)),
        }
    }

    /// Drives the multipart session: open if absent, upload missing parts in
    /// strict order, then complete. Parts already recorded on the task are
    /// skipped, which is what makes a paused task resumable.
    async fn run_multipart(
        &self,
        task: &SharedTask,
        store: &dyn ObjectStore,
        cancel: &CancellationToken,
        path: &Path,
        bucket: &str,
        key: &str,
        file_size: u64,
    ) -> Result<(), TransferError> {
        let task_id = { task.lock().unwrap().id.clone() };
        let total_parts = file_size.div_ceil(self.chunk_size) as i32;

        let existing = {
            let guard = task.lock().unwrap();
            guard.as_upload().and_then(|spec| spec.upload_id.clone())
        };
        let upload_id = match existing {
            Some(upload_id) => {
                let done = {
                    let guard = task.lock().unwrap();
                    guard
                        .as_upload()
                        .map(|spec| spec.completed_parts.len())
                        .unwrap_or(0)
                };
                info!(
                    "upload_resume: {} parts_done={}/{}",
                    task_id, done, total_parts
                );
                upload_id
            }
            None => {
                let upload_id = store.create_multipart_upload(bucket, key, cancel).await?;
                let mut guard = task.lock().unwrap();
                if let Some(spec) = guard.as_upload_mut() {
                    spec.upload_id = Some(upload_id.clone());
                    spec.completed_parts.clear();
                }
                info!(
                    "upload_session_open: {} id={} parts={}",
                    task_id, upload_id, total_parts
                );
                upload_id
            }
        };

        for part_number in 1..=total_parts {
            let already_done = {
                let guard = task.lock().unwrap();
                guard
                    .as_upload()
                    .map(|spec| {
                        spec.completed_parts
                            .iter()
                            .any(|part| part.part_number == part_number)
                    })
                    .unwrap_or(false)
            };
            if already_done {
                continue;
            }

            if cancel.is_cancelled() {
                return Err(TransferError::Paused {
                    next_part: part_number,
                });
            }

            let start = (part_number as u64 - 1) * self.chunk_size;
            let end = std::cmp::min(start + self.chunk_size, file_size);
            let body = Self::read_range(path, start, end - start).await?;

            let etag = store
                .upload_part(bucket, key, &upload_id, part_number, body, cancel)
                .await?;
            if etag.is_empty() {
                return Err(TransferError::MissingEtag { part_number });
            }

            let progress = {
                let mut guard = task.lock().unwrap();
                let spec = guard
                    .as_upload_mut()
                    .ok_or_else(|| TransferError::service("upload task changed kind"))?;
                spec.completed_parts.push(CompletedPart { part_number, etag });
                let progress = ((spec.completed_parts.len() as f64 / total_parts as f64) * 100.0)
                    .round() as u8;
                guard.progress = progress;
                progress
            };
            debug!(
                "upload_part_done: {} part={}/{} progress={}",
                task_id, part_number, total_parts, progress
            );
        }

        let mut parts = {
            let guard = task.lock().unwrap();
            guard
                .as_upload()
                .map(|spec| spec.completed_parts.clone())
                .unwrap_or_default()
        };
        parts.sort_by_key(|part| part.part_number);
        store
            .complete_multipart_upload(bucket, key, &upload_id, &parts, cancel)
            .await?;

        let mut guard = task.lock().unwrap();
        if let Some(spec) = guard.as_upload_mut() {
            spec.upload_id = None;
            spec.completed_parts.clear();
        }
        info!("upload_session_complete: {} parts={}", task_id, total_parts);
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for UploadHandler {
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle {
            pending: TaskStatus::Pending,
            running: TaskStatus::Running,
            completed: TaskStatus::Completed,
            failed: TaskStatus::Failed,
            canceled: TaskStatus::Canceled,
            paused: Some(TaskStatus::Paused),
        }
    }

    async fn perform(
        &self,
        task: SharedTask,
        store: Arc<dyn ObjectStore>,
        cancel: CancellationToken,
    ) -> Result<(), TransferError> {
        let (task_id, path, bucket, key): (String, PathBuf, String, String) = {
            let mut guard = task.lock().unwrap();
            guard.progress = 0;
            let spec = guard
                .as_upload()
                .ok_or_else(|| TransferError::service("upload handler given a non-upload task"))?;
            (
                guard.id.clone(),
                spec.path.clone(),
                spec.bucket.clone(),
                spec.key.clone(),
            )
        };

        let file_size = Self::file_size(&path).await?;

        if file_size <= self.chunk_size {
            debug!("upload_single: {} size={}", task_id, file_size);
            let body = Self::read_range(&path, 0, file_size).await?;
            store.put_object(&bucket, &key, body, &cancel).await?;
            task.lock().unwrap().progress = 100;
            return Ok(());
        }

        let result = self
            .run_multipart(&task, store.as_ref(), &cancel, &path, &bucket, &key, file_size)
            .await;

        if let Err(err) = result {
            let pause_requested = {
                let guard = task.lock().unwrap();
                guard
                    .as_upload()
                    .map(|spec| spec.pause_requested)
                    .unwrap_or(false)
            };
            // A requested pause can surface either as the distinguished
            // paused condition (token seen between parts) or as a cancel
            // observed inside the in-flight call.
            let is_pause = pause_requested
                && (matches!(
                    err,
                    TransferError::Paused { .. } | TransferError::Canceled
                ) || err.message_matches_any(&["pause", "abort"]));

            if !is_pause {
                // Free the server-side session; a later retry opens a fresh one.
                let upload_id = {
                    let guard = task.lock().unwrap();
                    guard.as_upload().and_then(|spec| spec.upload_id.clone())
                };
                if let Some(upload_id) = upload_id {
                    let abort_token = CancellationToken::new();
                    if let Err(abort_err) = store
                        .abort_multipart_upload(&bucket, &key, &upload_id, &abort_token)
                        .await
                    {
                        warn!("upload_abort_failed: {} error={}", task_id, abort_err);
                    }
                    let mut guard = task.lock().unwrap();
                    if let Some(spec) = guard.as_upload_mut() {
                        spec.upload_id = None;
                        spec.completed_parts.clear();
                    }
                }
            }
            return Err(err);
        }
        Ok(())
    }

    fn should_retry(&self, task: &Task, err: &TransferError) -> bool {
        if self.is_canceled_error(err) || task.retry_count >= self.max_retries {
            return false;
        }
        if err.is_client_error() {
            return false;
        }
        !err.message_matches_any(NON_RETRYABLE)
    }

    fn handle_error(&self, task: &mut Task, err: &TransferError) -> Option<ErrorOutcome> {
        let pause_requested = task.as_upload().map(|s| s.pause_requested).unwrap_or(false);
        let pause_like = matches!(
            err,
            TransferError::Paused { .. } | TransferError::Canceled
        ) || err.message_matches_any(&["pause", "abort"]);

        if pause_requested && pause_like {
            if let Some(paused) = self.lifecycle().paused {
                task.status = paused;
            }
            task.error = None;
            if let Some(spec) = task.as_upload_mut() {
                spec.pause_requested = false;
            }
            info!("upload_paused: {} progress={}", task.id, task.progress);
            return Some(ErrorOutcome::Handled);
        }
        None
    }

    fn is_canceled_error(&self, err: &TransferError) -> bool {
        matches!(
            err,
            TransferError::Canceled | TransferError::Paused { .. }
        ) || err.message_matches_any(&["cancel", "abort"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> UploadHandler {
        UploadHandler::new(3, 5 * 1024 * 1024)
    }

    fn task() -> Task {
        Task::upload("b1", "big.bin", "/tmp/big.bin")
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let err = TransferError::service_with_status("bad request", 400);
        assert!(!handler().should_retry(&task(), &err));
    }

    #[test]
    fn server_errors_are_retryable() {
        let err = TransferError::service_with_status("internal error", 500);
        assert!(handler().should_retry(&task(), &err));
    }

    #[test]
    fn deny_listed_messages_are_not_retryable() {
        let handler = handler();
        let task = task();
        for message in ["access denied", "file not found: /tmp/big.bin"] {
            assert!(!handler.should_retry(&task, &TransferError::service(message)));
        }
    }

    #[test]
    fn pause_requested_plus_abort_parks_the_task() {
        let handler = handler();
        let mut task = task();
        task.status = TaskStatus::Running;
        task.error = Some("stale".to_string());
        task.as_upload_mut().unwrap().pause_requested = true;

        let outcome = handler.handle_error(&mut task, &TransferError::Paused { next_part: 11 });
        assert_eq!(outcome, Some(ErrorOutcome::Handled));
        assert_eq!(task.status, TaskStatus::Paused);
        assert!(task.error.is_none());
        assert!(!task.as_upload().unwrap().pause_requested);
    }

    #[test]
    fn abort_without_pause_request_falls_through_to_cancel() {
        let handler = handler();
        let mut task = task();
        task.status = TaskStatus::Running;

        let err = TransferError::Paused { next_part: 4 };
        assert!(handler.handle_error(&mut task, &err).is_none());
        assert!(handler.is_canceled_error(&err));
    }

    #[test]
    fn upload_lifecycle_includes_paused() {
        assert_eq!(handler().lifecycle().paused, Some(TaskStatus::Paused));
    }
}
