//! Object-store client contract consumed by the transfer handlers.

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::TransferResult;

/// One finished part of a multipart session: number plus integrity tag.
/// A task's part list never contains two entries with the same number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// The operations the queue issues against an S3-compatible backend.
///
/// Every call is bound to a cancellation token; an implementation must
/// observe the token and surface the abort as
/// [`TransferError::Canceled`](crate::TransferError::Canceled), otherwise
/// a canceled task would be misclassified as failed.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> TransferResult<()>;

    /// Opens a multipart session and returns its upload id.
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> TransferResult<String>;

    /// Uploads one part and returns its etag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> TransferResult<String>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
        cancel: &CancellationToken,
    ) -> TransferResult<()>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        cancel: &CancellationToken,
    ) -> TransferResult<()>;

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> TransferResult<()>;
}
