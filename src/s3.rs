//! Production [`ObjectStore`] backed by the AWS S3 SDK.
//!
//! Works against any S3-compatible endpoint (MinIO, R2, AWS) via
//! `endpoint_url` + path-style addressing. Every SDK call is raced against
//! the task's cancellation token so an abort surfaces immediately instead of
//! waiting on the transport.

use async_trait::async_trait;
use aws_config::Region;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::client::{CompletedPart, ObjectStore};
use crate::error::{TransferError, TransferResult};

#[derive(Debug, Clone)]
pub struct S3StoreConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

pub struct S3Store {
    client: Client,
}

impl S3Store {
    pub fn new(config: &S3StoreConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "transfer-tasks",
        );

        let mut builder = S3ConfigBuilder::new()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()));

        if let Some(endpoint_url) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    /// Wraps an existing SDK client, e.g. one built from the ambient
    /// environment via `aws-config`.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn map_sdk_error<E>(err: SdkError<E>) -> TransferError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = match &err {
        SdkError::ServiceError(ctx) => Some(ctx.raw().status().as_u16()),
        _ => None,
    };
    let message = match (err.code(), err.message()) {
        (Some(code), Some(msg)) => format!("{}: {}", code, msg),
        (Some(code), None) => code.to_string(),
        _ => err.to_string(),
    };
    TransferError::Service { message, status }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> TransferResult<()> {
        let request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Canceled),
            result = request => {
                result.map_err(map_sdk_error)?;
                Ok(())
            }
        }
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> TransferResult<String> {
        let request = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Canceled),
            result = request => {
                let output = result.map_err(map_sdk_error)?;
                output
                    .upload_id()
                    .map(str::to_string)
                    .ok_or_else(|| TransferError::service("no upload id returned"))
            }
        }
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> TransferResult<String> {
        let request = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Canceled),
            result = request => {
                let output = result.map_err(map_sdk_error)?;
                Ok(output.e_tag().unwrap_or_default().to_string())
            }
        }
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
        cancel: &CancellationToken,
    ) -> TransferResult<()> {
        let completed: Vec<S3CompletedPart> = parts
            .iter()
            .map(|part| {
                S3CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(&part.etag)
                    .build()
            })
            .collect();
        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed))
            .build();
        let request = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(upload)
            .send();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Canceled),
            result = request => {
                result.map_err(map_sdk_error)?;
                Ok(())
            }
        }
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        cancel: &CancellationToken,
    ) -> TransferResult<()> {
        let request = self
            .client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Canceled),
            result = request => {
                result.map_err(map_sdk_error)?;
                Ok(())
            }
        }
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> TransferResult<()> {
        let request = self
            .client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Canceled),
            result = request => {
                result.map_err(map_sdk_error)?;
                Ok(())
            }
        }
    }
}
