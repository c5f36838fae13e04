//! Upload engine
//!
//! Drives each upload through `Pending -> Uploading -> Completed`, or to
//! `Cancelled` / `Expired`. Every operation on an id runs under that id's lock,
//! so the registry, the chunk store and the admission counters move together.
//! Terminal transitions are compare-and-set in the registry; the winner alone
//! releases the admission slot.

use std::sync::Arc;

use chrono::Utc;
use resumable_core::validation::{validate_declared_length, validate_metadata};
use resumable_core::{
    FinalizeCallback, FinalizeRequest, OwnerId, Ownership, OwnershipCheck, SlotStatus, TargetKind,
    UploadConfig, UploadError, UploadInfo, UploadMetadata, UploadProgress, UploadRecord,
    UploadResult, UploadState,
};
use resumable_storage::{ChunkChecksum, ChunkReader, ChunkStore, LocalChunkStore};
use tokio::io::AsyncReadExt;
use uuid::Uuid;

use crate::admission::AdmissionQueue;
use crate::locks::LockTable;
use crate::registry::{InMemoryUploadRegistry, OffsetUpdate, StateTransition, UploadRegistry};

pub struct UploadEngine {
    config: UploadConfig,
    registry: Arc<dyn UploadRegistry>,
    store: Arc<dyn ChunkStore>,
    admission: AdmissionQueue,
    locks: LockTable,
    ownership: Arc<dyn OwnershipCheck>,
    finalizer: Arc<dyn FinalizeCallback>,
}

impl UploadEngine {
    pub fn new(
        config: UploadConfig,
        registry: Arc<dyn UploadRegistry>,
        store: Arc<dyn ChunkStore>,
        ownership: Arc<dyn OwnershipCheck>,
        finalizer: Arc<dyn FinalizeCallback>,
    ) -> Self {
        let admission = AdmissionQueue::new(config.max_concurrent_per_owner);
        Self {
            config,
            registry,
            store,
            admission,
            locks: LockTable::new(),
            ownership,
            finalizer,
        }
    }

    /// Engine with an in-memory registry and a local chunk store rooted at
    /// `config.storage_path`.
    pub async fn in_memory(
        config: UploadConfig,
        ownership: Arc<dyn OwnershipCheck>,
        finalizer: Arc<dyn FinalizeCallback>,
    ) -> UploadResult<Self> {
        let store = LocalChunkStore::from_config(&config).await?;
        Ok(Self::new(
            config,
            Arc::new(InMemoryUploadRegistry::new()),
            Arc::new(store),
            ownership,
            finalizer,
        ))
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub(crate) fn registry(&self) -> &Arc<dyn UploadRegistry> {
        &self.registry
    }

    pub(crate) fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    pub(crate) fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// Open a new upload.
    ///
    /// Input is validated before anything is reserved. On success the record
    /// is `Pending` at offset 0 and holds one of the owner's admission slots.
    #[tracing::instrument(skip(self, metadata), fields(owner = %owner, target_kind = target.as_str()))]
    pub async fn initiate(
        &self,
        owner: &OwnerId,
        declared_length: u64,
        metadata: UploadMetadata,
        target: TargetKind,
    ) -> UploadResult<UploadRecord> {
        validate_declared_length(&self.config, &target, declared_length)?;
        validate_metadata(&target, &metadata)?;

        if let TargetKind::Replace { resource_id } = &target {
            match self.ownership.check(&target, owner).await? {
                Ownership::Owned => {}
                Ownership::NotOwned => {
                    return Err(UploadError::Forbidden(format!(
                        "Resource {} belongs to another owner",
                        resource_id
                    )))
                }
                Ownership::Missing => {
                    return Err(UploadError::NotFound(format!(
                        "Resource not found: {}",
                        resource_id
                    )))
                }
            }
        }

        let reservation = self.admission.try_reserve(owner).await;
        if !reservation.granted {
            tracing::warn!(
                owner = %owner,
                active = reservation.active,
                max_concurrent = reservation.max_concurrent,
                "Upload queue full"
            );
            return Err(UploadError::QueueFull {
                active: reservation.active,
                max_concurrent: reservation.max_concurrent,
            });
        }

        let record = UploadRecord::new(
            owner.clone(),
            target,
            declared_length,
            metadata,
            self.config.idle_timeout_chrono(),
        );
        let id = record.id;
        let _guard = self.locks.lock(id).await;

        if let Err(e) = self.store.create(id, declared_length).await {
            self.admission.release(owner).await;
            tracing::error!(upload_id = %id, error = %e, "Failed to allocate partial file");
            return Err(e.into());
        }

        if let Err(e) = self.registry.insert(record.clone()).await {
            self.admission.release(owner).await;
            if let Err(discard_err) = self.store.discard(id).await {
                tracing::warn!(upload_id = %id, error = %discard_err, "Failed to discard partial file");
            }
            tracing::error!(upload_id = %id, error = %e, "Failed to register upload");
            return Err(e.into());
        }

        tracing::info!(
            upload_id = %id,
            owner = %owner,
            declared_length = declared_length,
            active = reservation.active,
            "Upload initiated"
        );

        Ok(record)
    }

    /// Append one chunk at `offset`. See [`UploadEngine::chunk_with_checksum`].
    pub async fn chunk(
        &self,
        id: Uuid,
        owner: &OwnerId,
        offset: u64,
        reader: ChunkReader,
    ) -> UploadResult<UploadProgress> {
        self.chunk_with_checksum(id, owner, offset, reader, None)
            .await
    }

    /// Append one chunk at `offset`, optionally verifying its digest.
    ///
    /// `offset` must equal the recorded offset. When the chunk completes the
    /// upload, the file is finalized and handed to the finalize callback. If
    /// the callback fails the upload stays `Uploading` at full length and the
    /// call returns `FinalizeFailed`; sending an empty chunk at the final
    /// offset (or calling [`UploadEngine::finalize`]) retries it.
    #[tracing::instrument(skip(self, reader, checksum), fields(owner = %owner))]
    pub async fn chunk_with_checksum(
        &self,
        id: Uuid,
        owner: &OwnerId,
        offset: u64,
        mut reader: ChunkReader,
        checksum: Option<&ChunkChecksum>,
    ) -> UploadResult<UploadProgress> {
        let _guard = self.locks.lock(id).await;
        let record = self.load_active(id, owner).await?;

        if offset != record.current_offset {
            tracing::debug!(
                upload_id = %id,
                current = record.current_offset,
                requested = offset,
                "Chunk offset mismatch"
            );
            return Err(UploadError::OffsetMismatch {
                current: record.current_offset,
                requested: offset,
            });
        }

        if record.is_complete() {
            // Every byte is already stored; only a finalize retry is possible.
            let mut probe = [0u8; 1];
            if reader.read(&mut probe).await? > 0 {
                return Err(UploadError::SizeExceeded {
                    declared: record.declared_length,
                    attempted: record.declared_length + 1,
                });
            }
            let completed = self.complete_locked(record).await?;
            return Ok(completed.progress());
        }

        let written = self
            .store
            .write_at(id, offset, reader, checksum)
            .await?;
        if written == 0 {
            return Ok(record.progress());
        }

        let now = Utc::now();
        let update = OffsetUpdate {
            offset: offset + written,
            state: UploadState::Uploading,
            updated_at: now,
            expires_at: self.config.idle_deadline(now),
        };

        let updated = match self
            .registry
            .update_offset_and_state(id, record.state, update)
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                // Keep the store at the offset the registry still reports
                if let Err(truncate_err) = self.store.truncate(id, offset).await {
                    tracing::error!(
                        upload_id = %id,
                        offset = offset,
                        error = %truncate_err,
                        "Failed to undo chunk after registry update failed"
                    );
                }
                return Err(e.into());
            }
        };

        tracing::debug!(
            upload_id = %id,
            offset = updated.current_offset,
            declared_length = updated.declared_length,
            bytes_written = written,
            "Chunk accepted"
        );

        if updated.is_complete() {
            let completed = self.complete_locked(updated).await?;
            return Ok(completed.progress());
        }

        Ok(updated.progress())
    }

    /// Retry finalization of an upload whose bytes are all present.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn finalize(&self, id: Uuid, owner: &OwnerId) -> UploadResult<UploadRecord> {
        let _guard = self.locks.lock(id).await;
        let record = self.load_active(id, owner).await?;

        if !record.is_complete() {
            return Err(UploadError::Validation(format!(
                "Upload {} is incomplete: {} of {} bytes received",
                id, record.current_offset, record.declared_length
            )));
        }

        self.complete_locked(record).await
    }

    /// Offset query. Terminal uploads report their final state rather than
    /// an error.
    pub async fn status(&self, id: Uuid, owner: &OwnerId) -> UploadResult<UploadProgress> {
        let _guard = self.locks.lock(id).await;
        let record = self.load_current(id, owner).await?;
        Ok(record.progress())
    }

    pub async fn info(&self, id: Uuid, owner: &OwnerId) -> UploadResult<UploadInfo> {
        let _guard = self.locks.lock(id).await;
        let record = self.load_current(id, owner).await?;
        Ok(UploadInfo::from(&record))
    }

    /// Abort an active upload, release its slot and delete its bytes.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn cancel(&self, id: Uuid, owner: &OwnerId) -> UploadResult<()> {
        let _guard = self.locks.lock(id).await;
        let record = self.load_active(id, owner).await?;

        self.registry
            .update_state(
                id,
                &UploadState::ACTIVE,
                StateTransition::to(UploadState::Cancelled),
            )
            .await?;
        self.admission.release(&record.owner_id).await;

        if let Err(e) = self.store.discard(id).await {
            tracing::warn!(upload_id = %id, error = %e, "Failed to discard cancelled upload; reaper will retry");
        }

        tracing::info!(
            upload_id = %id,
            owner = %owner,
            offset = record.current_offset,
            "Upload cancelled"
        );
        Ok(())
    }

    /// Expire `id` if its idle deadline has passed.
    ///
    /// Returns `Ok(false)` when the upload is still within its deadline and a
    /// terminal error when it already left the active states.
    pub async fn expire(&self, id: Uuid) -> UploadResult<bool> {
        let _guard = self.locks.lock(id).await;
        let record = self
            .registry
            .get(id)
            .await?
            .ok_or_else(|| UploadError::NotFound(format!("Upload not found: {}", id)))?;

        if let Some(err) = UploadError::for_terminal_state(id, record.state) {
            return Err(err);
        }
        if !record.is_expired_at(Utc::now()) {
            return Ok(false);
        }

        self.expire_locked(&record).await?;
        Ok(true)
    }

    pub async fn slot_status(&self, owner: &OwnerId) -> SlotStatus {
        self.admission.snapshot(owner).await
    }

    pub async fn active_uploads(&self, owner: &OwnerId) -> UploadResult<Vec<UploadInfo>> {
        let records = self.registry.list_active_for_owner(owner).await?;
        Ok(records.iter().map(UploadInfo::from).collect())
    }

    /// Rebuild admission counters and chunk store bookkeeping from a
    /// persisted registry. Call once at startup, before serving requests.
    ///
    /// Uploads whose bytes cannot be recovered are expired. Returns the number
    /// of uploads restored.
    #[tracing::instrument(skip(self))]
    pub async fn restore(&self) -> UploadResult<usize> {
        let records = self.registry.list_active().await?;
        let mut restored = 0;

        for record in records {
            let _guard = self.locks.lock(record.id).await;
            match self
                .store
                .recover(record.id, record.declared_length, record.current_offset)
                .await
            {
                Ok(()) => {
                    self.admission.restore(&record.owner_id).await;
                    restored += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        upload_id = %record.id,
                        error = %e,
                        "Upload bytes unrecoverable, expiring"
                    );
                    if let Err(e) = self
                        .registry
                        .update_state(
                            record.id,
                            &UploadState::ACTIVE,
                            StateTransition::to(UploadState::Expired),
                        )
                        .await
                    {
                        tracing::error!(upload_id = %record.id, error = %e, "Failed to expire unrecoverable upload");
                    }
                    if let Err(e) = self.store.discard(record.id).await {
                        tracing::warn!(upload_id = %record.id, error = %e, "Failed to discard unrecoverable upload");
                    }
                }
            }
        }

        tracing::info!(restored = restored, "Upload state restored");
        Ok(restored)
    }

    /// Delete a terminal record past its retention. Completed uploads keep
    /// their permanent file; it belongs to the finalize callback.
    pub(crate) async fn purge_tombstone(&self, id: Uuid) -> UploadResult<bool> {
        let _guard = self.locks.lock(id).await;
        let Some(record) = self.registry.get(id).await? else {
            return Ok(false);
        };
        if record.state.is_active() {
            return Ok(false);
        }

        if record.state == UploadState::Completed {
            self.store.detach(id).await?;
        } else {
            self.store.discard(id).await?;
        }
        let deleted = self.registry.delete(id).await?;

        tracing::debug!(upload_id = %id, state = %record.state, "Tombstone purged");
        Ok(deleted)
    }

    /// Delete stored bytes that no registry record refers to.
    pub(crate) async fn remove_orphan(&self, id: Uuid) -> UploadResult<bool> {
        let _guard = self.locks.lock(id).await;
        if self.registry.get(id).await?.is_some() {
            return Ok(false);
        }
        self.store.discard(id).await?;
        tracing::debug!(upload_id = %id, "Orphaned partial file removed");
        Ok(true)
    }

    /// Load a record and check ownership.
    async fn load_owned(&self, id: Uuid, owner: &OwnerId) -> UploadResult<UploadRecord> {
        let record = self
            .registry
            .get(id)
            .await?
            .ok_or_else(|| UploadError::NotFound(format!("Upload not found: {}", id)))?;

        if &record.owner_id != owner {
            return Err(UploadError::Forbidden(format!(
                "Upload {} belongs to another owner",
                id
            )));
        }
        Ok(record)
    }

    /// Load a record, expiring it first if its idle deadline has passed.
    /// Caller holds the id lock.
    async fn load_current(&self, id: Uuid, owner: &OwnerId) -> UploadResult<UploadRecord> {
        let record = self.load_owned(id, owner).await?;
        if record.is_expired_at(Utc::now()) {
            return self.expire_locked(&record).await;
        }
        Ok(record)
    }

    /// Load a record that must still accept operations.
    async fn load_active(&self, id: Uuid, owner: &OwnerId) -> UploadResult<UploadRecord> {
        let record = self.load_current(id, owner).await?;
        if let Some(err) = UploadError::for_terminal_state(id, record.state) {
            return Err(err);
        }
        Ok(record)
    }

    async fn expire_locked(&self, record: &UploadRecord) -> UploadResult<UploadRecord> {
        let expired = self
            .registry
            .update_state(
                record.id,
                &UploadState::ACTIVE,
                StateTransition::to(UploadState::Expired),
            )
            .await?;
        self.admission.release(&record.owner_id).await;

        if let Err(e) = self.store.discard(record.id).await {
            tracing::warn!(upload_id = %record.id, error = %e, "Failed to discard expired upload; reaper will retry");
        }

        tracing::info!(
            upload_id = %record.id,
            owner = %record.owner_id,
            offset = record.current_offset,
            "Upload expired"
        );
        Ok(expired)
    }

    /// Finalize the stored file, run the callback and mark the record
    /// completed. Caller holds the id lock and has checked the record is
    /// complete and active.
    async fn complete_locked(&self, record: UploadRecord) -> UploadResult<UploadRecord> {
        let id = record.id;
        let path = self.store.finalize(id).await?;
        let start = std::time::Instant::now();

        let request = FinalizeRequest {
            upload_id: id,
            owner: record.owner_id.clone(),
            path,
            metadata: record.metadata.clone(),
            target: record.target.clone(),
            length: record.declared_length,
        };

        let resource = match self.finalizer.finalize(request).await {
            Ok(resource) => resource,
            Err(e) => {
                tracing::error!(
                    upload_id = %id,
                    error = %e,
                    "Finalize callback failed; upload kept for retry"
                );
                return Err(UploadError::FinalizeFailed {
                    upload_id: id,
                    message: format!("{:#}", e),
                });
            }
        };

        let completed = self
            .registry
            .update_state(
                id,
                &UploadState::ACTIVE,
                StateTransition {
                    state: UploadState::Completed,
                    updated_at: Utc::now(),
                    final_resource_id: Some(resource.resource_id.clone()),
                },
            )
            .await?;
        self.admission.release(&record.owner_id).await;

        if let Err(e) = self.store.detach(id).await {
            tracing::warn!(upload_id = %id, error = %e, "Failed to detach completed upload");
        }

        tracing::info!(
            upload_id = %id,
            owner = %record.owner_id,
            resource_id = %resource.resource_id,
            size_bytes = record.declared_length,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Upload completed"
        );
        Ok(completed)
    }
}
