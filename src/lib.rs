//! Background transfer task engine for S3-compatible object storage.
//!
//! Drives long-running, retryable, cancellable, resumable operations
//! (multipart upload, object deletion) against an object-storage backend
//! under a bounded concurrency pool. Built to sit beneath a storage console
//! UI: the UI enqueues tasks and subscribes to the event stream; the engine
//! guarantees every task settles into a terminal state.
//!
//! ```no_run
//! use std::sync::Arc;
//! use transfer_tasks::{ManagerConfig, S3Store, S3StoreConfig, TransferManager};
//!
//! # async fn example() {
//! let store = Arc::new(S3Store::new(&S3StoreConfig {
//!     access_key_id: "minio".into(),
//!     secret_access_key: "minio123".into(),
//!     region: "us-east-1".into(),
//!     endpoint_url: Some("http://localhost:9000".into()),
//!     force_path_style: true,
//! }));
//! let manager = TransferManager::new(store, ManagerConfig::default());
//! let mut events = manager.subscribe();
//! manager.enqueue_upload("media", "videos/big.bin", "/tmp/big.bin");
//! while let Ok(event) = events.recv().await {
//!     println!("{}", serde_json::to_string(&event).unwrap());
//! }
//! # }
//! ```

pub mod client;
pub mod error;
pub mod queue;
pub mod s3;

pub use client::{CompletedPart, ObjectStore};
pub use error::{TransferError, TransferResult};
pub use queue::{
    ManagerConfig, Task, TaskEvent, TaskKind, TaskSnapshot, TaskStatus, TransferManager,
};
pub use s3::{S3Store, S3StoreConfig};
