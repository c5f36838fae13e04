//! Resumable Storage Library
//!
//! This crate provides the chunk storage abstraction used by the upload engine
//! and a local filesystem implementation.
//!
//! # Layout
//!
//! The local backend keeps two directories under its root:
//!
//! - `partial/{upload_id}.part`: bytes received so far
//! - `complete/{upload_id}`: fully received files, moved here by `finalize`
//!
//! The store is the authority for each upload's write position. A write that
//! fails for any reason leaves the partial file at its pre-write length.

pub mod checksum;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod traits;

// Re-export commonly used types
pub use checksum::{ChecksumAlgorithm, ChunkChecksum};
#[cfg(feature = "storage-local")]
pub use local::LocalChunkStore;
pub use traits::{ChunkHandle, ChunkReader, ChunkStore, StorageError, StorageResult};
