//! Upload registry abstraction
//!
//! The registry is the single source of truth for upload records. Every
//! mutation is a single-record read-modify-write keyed by id, conditional on
//! the state the caller last observed, so concurrent terminal transitions
//! resolve to exactly one winner.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::InMemoryUploadRegistry;
#[cfg(feature = "postgres")]
pub use postgres::PgUploadRegistry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resumable_core::{OwnerId, UploadError, UploadRecord, UploadState};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Upload record not found: {0}")]
    NotFound(Uuid),

    #[error("Upload record already exists: {0}")]
    AlreadyExists(Uuid),

    #[error("Upload {id} is in state {actual}")]
    StateConflict { id: Uuid, actual: UploadState },

    #[error("Invalid offset {requested} for upload {id} (current {current}, declared {declared})")]
    InvalidOffset {
        id: Uuid,
        current: u64,
        requested: u64,
        declared: u64,
    },

    #[error("Registry backend error: {0}")]
    Backend(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

impl From<RegistryError> for UploadError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => UploadError::NotFound(format!("Upload not found: {}", id)),
            RegistryError::StateConflict { id, actual } => UploadError::for_terminal_state(id, actual)
                .unwrap_or_else(|| {
                    UploadError::Internal(format!("Upload {} changed state concurrently", id))
                }),
            RegistryError::InvalidOffset {
                current, requested, ..
            } => UploadError::OffsetMismatch { current, requested },
            other => UploadError::Internal(format!("Registry error: {}", other)),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        RegistryError::Backend(err.to_string())
    }
}

/// Offset progression applied together with a state change.
#[derive(Debug, Clone)]
pub struct OffsetUpdate {
    pub offset: u64,
    pub state: UploadState,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// State change without offset progression.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub state: UploadState,
    pub updated_at: DateTime<Utc>,
    /// Only set when completing; `None` leaves the stored value unchanged.
    pub final_resource_id: Option<String>,
}

impl StateTransition {
    pub fn to(state: UploadState) -> Self {
        Self {
            state,
            updated_at: Utc::now(),
            final_resource_id: None,
        }
    }
}

#[async_trait]
pub trait UploadRegistry: Send + Sync {
    /// Fails with `AlreadyExists` if the id is taken.
    async fn insert(&self, record: UploadRecord) -> RegistryResult<()>;

    async fn get(&self, id: Uuid) -> RegistryResult<Option<UploadRecord>>;

    /// Advance offset and state together.
    ///
    /// Fails with `StateConflict` unless the stored state equals `expected`,
    /// and with `InvalidOffset` if the new offset would move backwards or past
    /// the declared length.
    async fn update_offset_and_state(
        &self,
        id: Uuid,
        expected: UploadState,
        update: OffsetUpdate,
    ) -> RegistryResult<UploadRecord>;

    /// Change state if the stored state is one of `expected`, otherwise fail
    /// with `StateConflict` carrying the actual state.
    async fn update_state(
        &self,
        id: Uuid,
        expected: &[UploadState],
        transition: StateTransition,
    ) -> RegistryResult<UploadRecord>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: Uuid) -> RegistryResult<bool>;

    async fn list_active_for_owner(&self, owner: &OwnerId) -> RegistryResult<Vec<UploadRecord>>;

    /// Active records whose idle deadline is before `now`.
    async fn list_expired_before(&self, now: DateTime<Utc>) -> RegistryResult<Vec<UploadRecord>>;

    /// Every active record, for rebuilding in-memory state at startup.
    async fn list_active(&self) -> RegistryResult<Vec<UploadRecord>>;

    /// Terminal records last updated before `cutoff`.
    async fn list_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> RegistryResult<Vec<UploadRecord>>;
}
