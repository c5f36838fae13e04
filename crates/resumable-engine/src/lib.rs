//! Resumable Engine Library
//!
//! Orchestrates resumable (TUS-style) uploads on top of a [`ChunkStore`]:
//!
//! - [`AdmissionQueue`] bounds concurrent uploads per owner
//! - [`UploadRegistry`] is the source of truth for upload records
//! - [`UploadEngine`] drives the offset state machine and finalization
//! - [`Reaper`] expires idle uploads and cleans up what they leave behind
//!
//! Operations on one upload id are serialized through a per-id lock table;
//! different uploads proceed in parallel.
//!
//! [`ChunkStore`]: resumable_storage::ChunkStore

pub mod admission;
pub mod engine;
pub mod locks;
pub mod reaper;
pub mod registry;

// Re-export commonly used types
pub use admission::{AdmissionQueue, Reservation};
pub use engine::UploadEngine;
pub use locks::LockTable;
pub use reaper::{Reaper, ReaperHandle, SweepReport};
#[cfg(feature = "postgres")]
pub use registry::PgUploadRegistry;
pub use registry::{
    InMemoryUploadRegistry, OffsetUpdate, RegistryError, RegistryResult, StateTransition,
    UploadRegistry,
};
