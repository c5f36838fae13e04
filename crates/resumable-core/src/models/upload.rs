use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UploadMetadata;

/// Verified identity of the user that opened an upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OwnerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What a completed upload will become.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetKind {
    /// A brand new resource.
    NewFile,
    /// Replacement content for an existing resource.
    Replace { resource_id: String },
}

impl TargetKind {
    pub fn resource_id(&self) -> Option<&str> {
        match self {
            TargetKind::NewFile => None,
            TargetKind::Replace { resource_id } => Some(resource_id),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::NewFile => "new_file",
            TargetKind::Replace { .. } => "replace",
        }
    }
}

/// Upload lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Pending,
    Uploading,
    Completed,
    Cancelled,
    Expired,
}

impl UploadState {
    pub const ACTIVE: [UploadState; 2] = [UploadState::Pending, UploadState::Uploading];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Completed | UploadState::Cancelled | UploadState::Expired
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadState::Pending => write!(f, "pending"),
            UploadState::Uploading => write!(f, "uploading"),
            UploadState::Completed => write!(f, "completed"),
            UploadState::Cancelled => write!(f, "cancelled"),
            UploadState::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for UploadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UploadState::Pending),
            "uploading" => Ok(UploadState::Uploading),
            "completed" => Ok(UploadState::Completed),
            "cancelled" => Ok(UploadState::Cancelled),
            "expired" => Ok(UploadState::Expired),
            _ => Err(format!("Invalid upload state: {}", s)),
        }
    }
}

/// Registry entry for a single resumable upload.
///
/// `current_offset` never decreases and never exceeds `declared_length`.
/// The partial file location belongs to the chunk store and is not recorded
/// here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: Uuid,
    pub owner_id: OwnerId,
    pub target: TargetKind,
    pub declared_length: u64,
    pub current_offset: u64,
    pub metadata: UploadMetadata,
    pub state: UploadState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Resource id returned by the finalize callback once completed.
    pub final_resource_id: Option<String>,
}

impl UploadRecord {
    pub fn new(
        owner_id: OwnerId,
        target: TargetKind,
        declared_length: u64,
        metadata: UploadMetadata,
        idle_timeout: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            target,
            declared_length,
            current_offset: 0,
            metadata,
            state: UploadState::Pending,
            created_at: now,
            updated_at: now,
            expires_at: now
                .checked_add_signed(idle_timeout)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            final_resource_id: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.state.is_active() && self.expires_at < now
    }

    /// All declared bytes are durably written.
    pub fn is_complete(&self) -> bool {
        self.current_offset == self.declared_length
    }

    pub fn progress(&self) -> UploadProgress {
        UploadProgress {
            offset: self.current_offset,
            length: self.declared_length,
            state: self.state,
            expires_at: self.expires_at,
        }
    }
}

/// Answer to an offset query (TUS `HEAD`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadProgress {
    pub offset: u64,
    pub length: u64,
    pub state: UploadState,
    pub expires_at: DateTime<Utc>,
}

/// Detailed, client-facing view of an upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadInfo {
    pub upload_id: Uuid,
    pub target: TargetKind,
    pub state: UploadState,
    pub declared_length: u64,
    pub current_offset: u64,
    pub progress_percent: f64,
    pub metadata: UploadMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_resource_id: Option<String>,
}

impl From<&UploadRecord> for UploadInfo {
    fn from(record: &UploadRecord) -> Self {
        let progress_percent = if record.declared_length == 0 {
            0.0
        } else {
            (record.current_offset as f64 / record.declared_length as f64) * 100.0
        };

        Self {
            upload_id: record.id,
            target: record.target.clone(),
            state: record.state,
            declared_length: record.declared_length,
            current_offset: record.current_offset,
            progress_percent,
            metadata: record.metadata.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            expires_at: record.expires_at,
            final_resource_id: record.final_resource_id.clone(),
        }
    }
}

/// Per-owner admission counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    pub active: usize,
    /// 0 means unlimited.
    pub max_concurrent: usize,
}

impl SlotStatus {
    pub fn has_capacity(&self) -> bool {
        self.max_concurrent == 0 || self.active < self.max_concurrent
    }
}
