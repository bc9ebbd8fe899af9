//! Background transfer queue: scheduler, per-kind handlers, and task model.

mod delete;
mod handler;
mod manager;
mod types;
mod upload;

pub use delete::DeleteHandler;
pub use handler::{ErrorOutcome, TaskHandler};
pub use manager::{ManagerConfig, TransferManager};
pub use types::{
    DeleteSpec, Lifecycle, SharedTask, Task, TaskEvent, TaskKind, TaskSnapshot, TaskStatus,
    UploadSpec, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_RETRIES,
};
pub use upload::UploadHandler;
