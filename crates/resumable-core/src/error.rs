//! Error types module
//!
//! All engine operations return [`UploadError`]. Protocol adapters pick wire
//! status codes by switching on the variant (or on [`ErrorMetadata::error_code`]),
//! never on the rendered message.

use std::io;

use uuid::Uuid;

use crate::models::UploadState;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures or stale offsets
    Debug,
    /// Warning level - for recoverable issues like a full upload queue
    Warn,
    /// Error level - for unexpected storage or persistence failures
    Error,
}

/// Metadata describing how an error should be presented by a protocol adapter.
pub trait ErrorMetadata {
    /// Suggested HTTP status code. Adapters are free to map differently.
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "OFFSET_MISMATCH")
    fn error_code(&self) -> &'static str;

    /// Whether the same request may succeed if retried later
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden from clients
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

pub type UploadResult<T> = Result<T, UploadError>;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Upload queue full: {active}/{max_concurrent} uploads in progress")]
    QueueFull { active: usize, max_concurrent: usize },

    #[error("Offset mismatch: upload is at {current}, chunk sent for {requested}")]
    OffsetMismatch { current: u64, requested: u64 },

    #[error("Upload already completed: {0}")]
    AlreadyCompleted(Uuid),

    #[error("Upload cancelled: {0}")]
    Cancelled(Uuid),

    #[error("Upload expired: {0}")]
    Expired(Uuid),

    #[error("Size exceeded: {attempted} bytes exceeds declared length {declared}")]
    SizeExceeded { declared: u64, attempted: u64 },

    #[error("Checksum mismatch for upload {0}")]
    ChecksumMismatch(Uuid),

    #[error("Finalize failed for upload {upload_id}: {message}")]
    FinalizeFailed { upload_id: Uuid, message: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl UploadError {
    /// Terminal-specific error for a record that is no longer active.
    /// Returns `None` for `Pending` and `Uploading`.
    pub fn for_terminal_state(id: Uuid, state: UploadState) -> Option<Self> {
        match state {
            UploadState::Completed => Some(UploadError::AlreadyCompleted(id)),
            UploadState::Cancelled => Some(UploadError::Cancelled(id)),
            UploadState::Expired => Some(UploadError::Expired(id)),
            UploadState::Pending | UploadState::Uploading => None,
        }
    }

    /// Whether this error reports that the upload reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadError::AlreadyCompleted(_) | UploadError::Cancelled(_) | UploadError::Expired(_)
        )
    }

    /// Authoritative offset carried by an offset mismatch, for client resync.
    pub fn current_offset(&self) -> Option<u64> {
        match self {
            UploadError::OffsetMismatch { current, .. } => Some(*current),
            _ => None,
        }
    }

    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            UploadError::Validation(_) => "Validation",
            UploadError::NotFound(_) => "NotFound",
            UploadError::Forbidden(_) => "Forbidden",
            UploadError::QueueFull { .. } => "QueueFull",
            UploadError::OffsetMismatch { .. } => "OffsetMismatch",
            UploadError::AlreadyCompleted(_) => "AlreadyCompleted",
            UploadError::Cancelled(_) => "Cancelled",
            UploadError::Expired(_) => "Expired",
            UploadError::SizeExceeded { .. } => "SizeExceeded",
            UploadError::ChecksumMismatch(_) => "ChecksumMismatch",
            UploadError::FinalizeFailed { .. } => "FinalizeFailed",
            UploadError::Internal(_) => "Internal",
            UploadError::InternalWithSource { .. } => "Internal",
        }
    }
}

impl From<anyhow::Error> for UploadError {
    fn from(err: anyhow::Error) -> Self {
        UploadError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for UploadError {
    fn from(err: io::Error) -> Self {
        UploadError::Internal(format!("IO error: {}", err))
    }
}

impl From<validator::ValidationErrors> for UploadError {
    fn from(err: validator::ValidationErrors) -> Self {
        UploadError::Validation(format!("Invalid metadata: {}", err))
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
fn upload_error_static_metadata(
    err: &UploadError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        UploadError::Validation(_) => (
            400,
            "VALIDATION_ERROR",
            false,
            Some("Check Upload-Length and Upload-Metadata and try again"),
            false,
            LogLevel::Debug,
        ),
        UploadError::NotFound(_) => (
            404,
            "NOT_FOUND",
            false,
            Some("Verify the upload or resource ID exists"),
            false,
            LogLevel::Debug,
        ),
        UploadError::Forbidden(_) => (
            403,
            "FORBIDDEN",
            false,
            None,
            false,
            LogLevel::Debug,
        ),
        UploadError::QueueFull { .. } => (
            429,
            "QUEUE_FULL",
            true,
            Some("Finish or cancel an active upload, then retry"),
            false,
            LogLevel::Warn,
        ),
        UploadError::OffsetMismatch { .. } => (
            409,
            "OFFSET_MISMATCH",
            true,
            Some("Query the upload offset and resume from it"),
            false,
            LogLevel::Debug,
        ),
        UploadError::AlreadyCompleted(_) => (
            409,
            "ALREADY_COMPLETED",
            false,
            None,
            false,
            LogLevel::Debug,
        ),
        UploadError::Cancelled(_) => (
            410,
            "UPLOAD_CANCELLED",
            false,
            Some("Start a new upload"),
            false,
            LogLevel::Debug,
        ),
        UploadError::Expired(_) => (
            410,
            "UPLOAD_EXPIRED",
            false,
            Some("Start a new upload"),
            false,
            LogLevel::Debug,
        ),
        UploadError::SizeExceeded { .. } => (
            413,
            "SIZE_EXCEEDED",
            false,
            Some("Send no more than the declared Upload-Length"),
            false,
            LogLevel::Debug,
        ),
        UploadError::ChecksumMismatch(_) => (
            460,
            "CHECKSUM_MISMATCH",
            true,
            Some("Resend the chunk from the current offset"),
            false,
            LogLevel::Debug,
        ),
        UploadError::FinalizeFailed { .. } => (
            500,
            "FINALIZE_FAILED",
            true,
            Some("Retry finalization after a short delay"),
            true,
            LogLevel::Error,
        ),
        UploadError::Internal(_) => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        UploadError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl ErrorMetadata for UploadError {
    fn http_status_code(&self) -> u16 {
        upload_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        upload_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        upload_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        upload_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        upload_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        upload_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            UploadError::Validation(ref msg) => msg.clone(),
            UploadError::NotFound(ref msg) => msg.clone(),
            UploadError::Forbidden(_) => "Access to this upload is not allowed".to_string(),
            UploadError::QueueFull {
                active,
                max_concurrent,
            } => format!(
                "Too many uploads in progress ({}/{})",
                active, max_concurrent
            ),
            UploadError::OffsetMismatch { current, .. } => {
                format!("Upload offset is {}", current)
            }
            UploadError::AlreadyCompleted(_) => "Upload already completed".to_string(),
            UploadError::Cancelled(_) => "Upload was cancelled".to_string(),
            UploadError::Expired(_) => "Upload has expired".to_string(),
            UploadError::SizeExceeded { declared, .. } => {
                format!("Upload exceeds its declared length of {} bytes", declared)
            }
            UploadError::ChecksumMismatch(_) => "Chunk checksum mismatch".to_string(),
            UploadError::FinalizeFailed { .. } => "Failed to finalize upload".to_string(),
            UploadError::Internal(_) => "Internal server error".to_string(),
            UploadError::InternalWithSource { .. } => "Internal server error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_offset_mismatch() {
        let err = UploadError::OffsetMismatch {
            current: 6,
            requested: 5,
        };
        assert_eq!(err.http_status_code(), 409);
        assert_eq!(err.error_code(), "OFFSET_MISMATCH");
        assert!(err.is_recoverable());
        assert_eq!(err.current_offset(), Some(6));
        assert_eq!(err.client_message(), "Upload offset is 6");
        assert_eq!(err.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_queue_full_is_distinct_from_internal() {
        let full = UploadError::QueueFull {
            active: 3,
            max_concurrent: 3,
        };
        let internal = UploadError::Internal("disk".to_string());
        assert_ne!(full.error_code(), internal.error_code());
        assert_eq!(full.http_status_code(), 429);
        assert!(!full.is_sensitive());
        assert!(internal.is_sensitive());
        assert_eq!(internal.client_message(), "Internal server error");
    }

    #[test]
    fn test_terminal_state_mapping() {
        let id = Uuid::new_v4();
        assert!(matches!(
            UploadError::for_terminal_state(id, UploadState::Completed),
            Some(UploadError::AlreadyCompleted(got)) if got == id
        ));
        assert!(matches!(
            UploadError::for_terminal_state(id, UploadState::Cancelled),
            Some(UploadError::Cancelled(_))
        ));
        assert!(matches!(
            UploadError::for_terminal_state(id, UploadState::Expired),
            Some(UploadError::Expired(_))
        ));
        assert!(UploadError::for_terminal_state(id, UploadState::Pending).is_none());
        assert!(UploadError::for_terminal_state(id, UploadState::Uploading).is_none());
    }

    #[test]
    fn test_anyhow_conversion_keeps_source() {
        use std::error::Error;

        let err = UploadError::from(anyhow::anyhow!("callback exploded"));
        assert_eq!(err.error_type(), "Internal");
        assert!(err.source().is_some());
    }
}
