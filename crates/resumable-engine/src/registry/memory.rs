use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resumable_core::{OwnerId, UploadRecord, UploadState};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{OffsetUpdate, RegistryError, RegistryResult, StateTransition, UploadRegistry};

/// Process-local registry. State does not survive a restart.
#[derive(Clone, Default)]
pub struct InMemoryUploadRegistry {
    records: Arc<RwLock<HashMap<Uuid, UploadRecord>>>,
}

impl InMemoryUploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl UploadRegistry for InMemoryUploadRegistry {
    async fn insert(&self, record: UploadRecord) -> RegistryResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(RegistryError::AlreadyExists(record.id));
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> RegistryResult<Option<UploadRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn update_offset_and_state(
        &self,
        id: Uuid,
        expected: UploadState,
        update: OffsetUpdate,
    ) -> RegistryResult<UploadRecord> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(RegistryError::NotFound(id))?;

        if record.state != expected {
            return Err(RegistryError::StateConflict {
                id,
                actual: record.state,
            });
        }
        if update.offset < record.current_offset || update.offset > record.declared_length {
            return Err(RegistryError::InvalidOffset {
                id,
                current: record.current_offset,
                requested: update.offset,
                declared: record.declared_length,
            });
        }

        record.current_offset = update.offset;
        record.state = update.state;
        record.updated_at = update.updated_at;
        record.expires_at = update.expires_at;
        Ok(record.clone())
    }

    async fn update_state(
        &self,
        id: Uuid,
        expected: &[UploadState],
        transition: StateTransition,
    ) -> RegistryResult<UploadRecord> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(RegistryError::NotFound(id))?;

        if !expected.contains(&record.state) {
            return Err(RegistryError::StateConflict {
                id,
                actual: record.state,
            });
        }

        record.state = transition.state;
        record.updated_at = transition.updated_at;
        if let Some(resource_id) = transition.final_resource_id {
            record.final_resource_id = Some(resource_id);
        }
        Ok(record.clone())
    }

    async fn delete(&self, id: Uuid) -> RegistryResult<bool> {
        Ok(self.records.write().await.remove(&id).is_some())
    }

    async fn list_active_for_owner(&self, owner: &OwnerId) -> RegistryResult<Vec<UploadRecord>> {
        let records = self.records.read().await;
        let mut active: Vec<_> = records
            .values()
            .filter(|r| r.state.is_active() && &r.owner_id == owner)
            .cloned()
            .collect();
        active.sort_by_key(|r| r.created_at);
        Ok(active)
    }

    async fn list_expired_before(&self, now: DateTime<Utc>) -> RegistryResult<Vec<UploadRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.is_expired_at(now))
            .cloned()
            .collect())
    }

    async fn list_active(&self) -> RegistryResult<Vec<UploadRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.state.is_active())
            .cloned()
            .collect())
    }

    async fn list_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> RegistryResult<Vec<UploadRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.state.is_terminal() && r.updated_at < cutoff)
            .cloned()
            .collect())
    }
}
