//! Resumable Core Library
//!
//! This crate provides the domain models, error taxonomy, configuration, hook
//! traits and metadata validation shared by the resumable upload storage and
//! engine crates.

pub mod config;
pub mod error;
pub mod hooks;
pub mod models;
pub mod telemetry;
pub mod validation;

// Re-export commonly used types
pub use config::UploadConfig;
pub use error::{ErrorMetadata, LogLevel, UploadError, UploadResult};
pub use hooks::{
    AllowAllOwnership, FinalizeCallback, FinalizeRequest, FinalizedResource, NoOpFinalizer,
    Ownership, OwnershipCheck,
};
pub use models::{
    OwnerId, SlotStatus, TargetKind, UploadInfo, UploadMetadata, UploadProgress, UploadRecord,
    UploadState,
};
pub use telemetry::init_telemetry;
