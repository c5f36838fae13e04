//! Hooks and traits for host integration
//!
//! The engine does not know how business resources are stored or who may
//! modify them. The host application implements these traits and injects them
//! when building the engine.

use std::path::PathBuf;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{OwnerId, TargetKind, UploadMetadata};

/// Result of an ownership lookup for a replacement target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Owned,
    NotOwned,
    Missing,
}

/// Decides whether an owner may replace the resource named by a target.
///
/// Only consulted for [`TargetKind::Replace`]; new-file uploads skip it.
#[async_trait]
pub trait OwnershipCheck: Send + Sync {
    async fn check(&self, target: &TargetKind, owner: &OwnerId) -> anyhow::Result<Ownership>;
}

/// Everything the host needs to commit a completed upload.
#[derive(Debug, Clone)]
pub struct FinalizeRequest {
    pub upload_id: Uuid,
    pub owner: OwnerId,
    /// Permanent location of the assembled file.
    pub path: PathBuf,
    pub metadata: UploadMetadata,
    pub target: TargetKind,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedResource {
    pub resource_id: String,
}

/// Commits a completed upload into the host's domain.
///
/// May be invoked more than once for the same upload id when an earlier call
/// failed, so implementations must be idempotent.
#[async_trait]
pub trait FinalizeCallback: Send + Sync {
    async fn finalize(&self, request: FinalizeRequest) -> anyhow::Result<FinalizedResource>;
}

/// Ownership check that treats every replacement target as owned.
pub struct AllowAllOwnership;

#[async_trait]
impl OwnershipCheck for AllowAllOwnership {
    async fn check(&self, _target: &TargetKind, _owner: &OwnerId) -> anyhow::Result<Ownership> {
        Ok(Ownership::Owned)
    }
}

/// Finalize callback that leaves the file in place and reports the upload id
/// as the resource id.
pub struct NoOpFinalizer;

#[async_trait]
impl FinalizeCallback for NoOpFinalizer {
    async fn finalize(&self, request: FinalizeRequest) -> anyhow::Result<FinalizedResource> {
        Ok(FinalizedResource {
            resource_id: request.upload_id.to_string(),
        })
    }
}
