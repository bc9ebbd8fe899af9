//! Error taxonomy shared by the object-store client and the task queue.

use thiserror::Error;

pub type TransferResult<T> = Result<T, TransferError>;

/// Every failure a transfer can surface. The queue classifies these into
/// retry / canceled / paused / failed, so no variant escapes the scheduler.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The cancellation token bound to the operation was revoked.
    #[error("transfer canceled")]
    Canceled,

    /// An upload observed its token revoked between parts while a pause was
    /// requested. Distinguished from [`TransferError::Canceled`] so the
    /// upload handler can park the task instead of failing it.
    #[error("upload paused before part {next_part}")]
    Paused { next_part: i32 },

    /// Structured error from the storage backend, with the HTTP-style status
    /// when the backend exposed one.
    #[error("{message}")]
    Service { message: String, status: Option<u16> },

    /// Local payload file access failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The backend accepted a part but returned no integrity tag.
    #[error("no etag returned for part {part_number}")]
    MissingEtag { part_number: i32 },
}

impl TransferError {
    pub fn service(message: impl Into<String>) -> Self {
        TransferError::Service {
            message: message.into(),
            status: None,
        }
    }

    pub fn service_with_status(message: impl Into<String>, status: u16) -> Self {
        TransferError::Service {
            message: message.into(),
            status: Some(status),
        }
    }

    /// HTTP-style status code, when the backend reported one.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransferError::Service { status, .. } => *status,
            _ => None,
        }
    }

    /// True for 4xx-class service errors, which no retry will fix.
    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(status) if (400..500).contains(&status))
    }

    /// Case-insensitive match of the error text against a set of needles.
    pub(crate) fn message_matches_any(&self, needles: &[&str]) -> bool {
        let text = self.to_string().to_ascii_lowercase();
        needles.iter().any(|needle| text.contains(needle))
    }
}
