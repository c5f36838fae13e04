//! Chunk storage abstraction trait
//!
//! This module defines the ChunkStore trait that all chunk storage backends
//! must implement.

use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use resumable_core::UploadError;
use thiserror::Error;
use tokio::io::AsyncRead;
use uuid::Uuid;

use crate::checksum::ChunkChecksum;

/// Chunk storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload already exists in store: {0}")]
    AlreadyExists(Uuid),

    #[error("Upload not found in store: {0}")]
    NotFound(Uuid),

    #[error("Offset mismatch for {id}: store is at {current}, write requested at {requested}")]
    OffsetMismatch {
        id: Uuid,
        current: u64,
        requested: u64,
    },

    #[error("Write for {id} would reach {attempted} bytes, declared length is {declared}")]
    SizeExceeded {
        id: Uuid,
        declared: u64,
        attempted: u64,
    },

    #[error("Upload {id} is incomplete: {offset} of {declared} bytes")]
    IncompleteUpload { id: Uuid, offset: u64, declared: u64 },

    #[error("Checksum mismatch for upload {0}")]
    ChecksumMismatch(Uuid),

    #[error("Invalid checksum: {0}")]
    InvalidChecksum(String),

    #[error("Upload already finalized: {0}")]
    AlreadyFinalized(Uuid),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for UploadError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => {
                UploadError::NotFound(format!("Upload data not found: {}", id))
            }
            StorageError::OffsetMismatch {
                current, requested, ..
            } => UploadError::OffsetMismatch { current, requested },
            StorageError::SizeExceeded {
                declared,
                attempted,
                ..
            } => UploadError::SizeExceeded {
                declared,
                attempted,
            },
            StorageError::ChecksumMismatch(id) => UploadError::ChecksumMismatch(id),
            StorageError::InvalidChecksum(msg) => UploadError::Validation(msg),
            other => UploadError::Internal(format!("Storage error: {}", other)),
        }
    }
}

/// Body of a single chunk request
pub type ChunkReader = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Opaque receipt for a freshly allocated upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHandle {
    pub id: Uuid,
    pub declared_length: u64,
}

/// Offset-addressed byte storage for in-flight uploads.
///
/// Writes for a single id are serialized by the backend. Paths of partial
/// files never leave the backend; only the permanent path returned by
/// [`ChunkStore::finalize`] is handed out.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Allocate an empty partial file for `id`.
    async fn create(&self, id: Uuid, declared_length: u64) -> StorageResult<ChunkHandle>;

    /// Append everything `reader` yields, strictly at `offset`.
    ///
    /// Returns the number of bytes written. On any error the partial file is
    /// restored to `offset` bytes. When `checksum` is given the digest of the
    /// received bytes must match before the write is kept.
    async fn write_at(
        &self,
        id: Uuid,
        offset: u64,
        reader: ChunkReader,
        checksum: Option<&ChunkChecksum>,
    ) -> StorageResult<u64>;

    /// Current write position known to the store
    async fn offset(&self, id: Uuid) -> StorageResult<u64>;

    /// Shrink the partial file back to `offset`, which must not exceed the
    /// current position. Used to undo a write whose bookkeeping failed.
    async fn truncate(&self, id: Uuid, offset: u64) -> StorageResult<()>;

    /// Move a fully written file to its permanent location.
    ///
    /// Fails with `IncompleteUpload` unless every declared byte is present.
    /// Calling it again returns the same path.
    async fn finalize(&self, id: Uuid) -> StorageResult<PathBuf>;

    /// Delete the partial or finalized file for `id`. Missing files are not
    /// an error.
    async fn discard(&self, id: Uuid) -> StorageResult<()>;

    /// Forget `id` without touching the filesystem, once the permanent file
    /// belongs to someone else.
    async fn detach(&self, id: Uuid) -> StorageResult<()>;

    /// Re-open the file for `id` after a restart.
    ///
    /// Bytes beyond `offset` (written but never recorded) are truncated. A
    /// file shorter than `offset` is an error.
    async fn recover(&self, id: Uuid, declared_length: u64, offset: u64) -> StorageResult<()>;

    /// Ids of all partial files present in the backend.
    async fn list_partials(&self) -> StorageResult<Vec<Uuid>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_map_to_upload_errors() {
        let id = Uuid::new_v4();

        let err: UploadError = StorageError::OffsetMismatch {
            id,
            current: 4,
            requested: 2,
        }
        .into();
        assert!(matches!(
            err,
            UploadError::OffsetMismatch {
                current: 4,
                requested: 2
            }
        ));

        let err: UploadError = StorageError::SizeExceeded {
            id,
            declared: 10,
            attempted: 11,
        }
        .into();
        assert!(matches!(err, UploadError::SizeExceeded { declared: 10, .. }));

        let err: UploadError = StorageError::ChecksumMismatch(id).into();
        assert!(matches!(err, UploadError::ChecksumMismatch(got) if got == id));

        let err: UploadError = StorageError::WriteFailed("disk full".to_string()).into();
        assert!(matches!(err, UploadError::Internal(_)));
    }
}
