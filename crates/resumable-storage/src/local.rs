use std::collections::HashMap;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use resumable_core::UploadConfig;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::checksum::ChunkChecksum;
use crate::traits::{ChunkHandle, ChunkReader, ChunkStore, StorageError, StorageResult};

const COPY_BUFFER_SIZE: usize = 64 * 1024;
const PARTIAL_EXTENSION: &str = "part";

/// Bookkeeping for one upload, guarded by its own mutex so writes to the same
/// id never interleave.
struct PartialFile {
    declared_length: u64,
    offset: u64,
    finalized: Option<PathBuf>,
}

struct Inner {
    partial_dir: PathBuf,
    complete_dir: PathBuf,
    files: RwLock<HashMap<Uuid, Arc<Mutex<PartialFile>>>>,
}

/// Local filesystem chunk store
#[derive(Clone)]
pub struct LocalChunkStore {
    inner: Arc<Inner>,
}

impl LocalChunkStore {
    /// Create a new LocalChunkStore
    ///
    /// # Arguments
    /// * `partial_dir` - Directory for in-progress uploads
    /// * `complete_dir` - Directory finalized uploads are moved into. Must be on
    ///   the same filesystem as `partial_dir` so the move is a rename.
    pub async fn new(
        partial_dir: impl Into<PathBuf>,
        complete_dir: impl Into<PathBuf>,
    ) -> StorageResult<Self> {
        let partial_dir = partial_dir.into();
        let complete_dir = complete_dir.into();

        for dir in [&partial_dir, &complete_dir] {
            fs::create_dir_all(dir).await.map_err(|e| {
                StorageError::ConfigError(format!(
                    "Failed to create storage directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        Ok(LocalChunkStore {
            inner: Arc::new(Inner {
                partial_dir,
                complete_dir,
                files: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub async fn from_config(config: &UploadConfig) -> StorageResult<Self> {
        Self::new(config.partial_dir(), config.complete_dir()).await
    }

    fn partial_path(&self, id: Uuid) -> PathBuf {
        self.inner
            .partial_dir
            .join(format!("{}.{}", id, PARTIAL_EXTENSION))
    }

    fn complete_path(&self, id: Uuid) -> PathBuf {
        self.inner.complete_dir.join(id.to_string())
    }

    async fn entry(&self, id: Uuid) -> StorageResult<Arc<Mutex<PartialFile>>> {
        self.inner
            .files
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound(id))
    }

    /// Whether the store currently tracks `id`.
    pub async fn is_tracked(&self, id: Uuid) -> bool {
        self.inner.files.read().await.contains_key(&id)
    }
}

/// Stream `reader` into `file`, refusing to pass `declared` and verifying the
/// digest when one is expected.
async fn copy_chunk(
    id: Uuid,
    reader: &mut ChunkReader,
    file: &mut File,
    offset: u64,
    declared: u64,
    checksum: Option<&ChunkChecksum>,
) -> StorageResult<u64> {
    let mut hasher = checksum.map(|c| c.algorithm.hasher());
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut written: u64 = 0;

    loop {
        let n = reader.read(&mut buf).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to read chunk body for {}: {}", id, e))
        })?;
        if n == 0 {
            break;
        }

        let attempted = offset + written + n as u64;
        if attempted > declared {
            return Err(StorageError::SizeExceeded {
                id,
                declared,
                attempted,
            });
        }

        if let Some(hasher) = hasher.as_mut() {
            hasher.update(&buf[..n]);
        }

        file.write_all(&buf[..n]).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to write chunk for {}: {}", id, e))
        })?;
        written += n as u64;
    }

    if let (Some(expected), Some(hasher)) = (checksum, hasher) {
        if !expected.matches(&hasher.finalize()) {
            return Err(StorageError::ChecksumMismatch(id));
        }
    }

    file.flush().await.map_err(|e| {
        StorageError::WriteFailed(format!("Failed to flush chunk for {}: {}", id, e))
    })?;
    file.sync_data().await.map_err(|e| {
        StorageError::WriteFailed(format!("Failed to sync chunk for {}: {}", id, e))
    })?;

    Ok(written)
}

async fn rollback(file: &File, path: &Path, offset: u64) {
    match file.set_len(offset).await {
        Ok(()) => {
            if let Err(e) = file.sync_data().await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to sync rolled back partial file");
            }
        }
        Err(e) => {
            // The next write re-truncates to the tracked offset before appending.
            tracing::error!(
                path = %path.display(),
                offset = offset,
                error = %e,
                "Failed to roll back partial file"
            );
        }
    }
}

async fn remove_if_exists(path: &Path) -> StorageResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::DeleteFailed(format!(
            "Failed to delete file {}: {}",
            path.display(),
            e
        ))),
    }
}

#[async_trait]
impl ChunkStore for LocalChunkStore {
    async fn create(&self, id: Uuid, declared_length: u64) -> StorageResult<ChunkHandle> {
        let mut files = self.inner.files.write().await;
        if files.contains_key(&id) {
            return Err(StorageError::AlreadyExists(id));
        }

        let path = self.partial_path(id);
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => StorageError::AlreadyExists(id),
                _ => StorageError::WriteFailed(format!(
                    "Failed to create partial file {}: {}",
                    path.display(),
                    e
                )),
            })?;

        files.insert(
            id,
            Arc::new(Mutex::new(PartialFile {
                declared_length,
                offset: 0,
                finalized: None,
            })),
        );

        tracing::debug!(
            upload_id = %id,
            declared_length = declared_length,
            "Partial file created"
        );

        Ok(ChunkHandle {
            id,
            declared_length,
        })
    }

    async fn write_at(
        &self,
        id: Uuid,
        offset: u64,
        mut reader: ChunkReader,
        checksum: Option<&ChunkChecksum>,
    ) -> StorageResult<u64> {
        let entry = self.entry(id).await?;
        let mut state = entry.lock().await;

        if state.finalized.is_some() {
            return Err(StorageError::AlreadyFinalized(id));
        }
        if offset != state.offset {
            return Err(StorageError::OffsetMismatch {
                id,
                current: state.offset,
                requested: offset,
            });
        }

        let path = self.partial_path(id);
        let start = std::time::Instant::now();

        let mut file = OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .map_err(|e| {
                StorageError::WriteFailed(format!(
                    "Failed to open partial file {}: {}",
                    path.display(),
                    e
                ))
            })?;

        // Drop bytes left behind by a rollback that did not complete.
        let on_disk = file.metadata().await?.len();
        if on_disk != offset {
            file.set_len(offset).await?;
        }
        file.seek(SeekFrom::Start(offset)).await?;

        match copy_chunk(
            id,
            &mut reader,
            &mut file,
            offset,
            state.declared_length,
            checksum,
        )
        .await
        {
            Ok(written) => {
                state.offset = offset + written;
                tracing::debug!(
                    upload_id = %id,
                    offset = state.offset,
                    bytes_written = written,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Chunk written"
                );
                Ok(written)
            }
            Err(e) => {
                rollback(&file, &path, offset).await;
                tracing::debug!(upload_id = %id, offset = offset, error = %e, "Chunk write rolled back");
                Err(e)
            }
        }
    }

    async fn offset(&self, id: Uuid) -> StorageResult<u64> {
        let entry = self.entry(id).await?;
        let state = entry.lock().await;
        Ok(state.offset)
    }

    async fn truncate(&self, id: Uuid, offset: u64) -> StorageResult<()> {
        let entry = self.entry(id).await?;
        let mut state = entry.lock().await;

        if state.finalized.is_some() {
            return Err(StorageError::AlreadyFinalized(id));
        }
        if offset > state.offset {
            return Err(StorageError::OffsetMismatch {
                id,
                current: state.offset,
                requested: offset,
            });
        }

        let path = self.partial_path(id);
        let file = OpenOptions::new().write(true).open(&path).await?;
        file.set_len(offset).await?;
        file.sync_data().await?;

        tracing::debug!(upload_id = %id, from = state.offset, to = offset, "Partial file truncated");
        state.offset = offset;
        Ok(())
    }

    async fn finalize(&self, id: Uuid) -> StorageResult<PathBuf> {
        let entry = self.entry(id).await?;
        let mut state = entry.lock().await;

        if let Some(path) = &state.finalized {
            return Ok(path.clone());
        }
        if state.offset != state.declared_length {
            return Err(StorageError::IncompleteUpload {
                id,
                offset: state.offset,
                declared: state.declared_length,
            });
        }

        let from = self.partial_path(id);
        let to = self.complete_path(id);
        fs::rename(&from, &to).await.map_err(|e| {
            StorageError::WriteFailed(format!(
                "Failed to move {} to {}: {}",
                from.display(),
                to.display(),
                e
            ))
        })?;

        tracing::info!(
            upload_id = %id,
            path = %to.display(),
            size_bytes = state.declared_length,
            "Upload finalized to permanent storage"
        );

        state.finalized = Some(to.clone());
        Ok(to)
    }

    async fn discard(&self, id: Uuid) -> StorageResult<()> {
        let entry = self.inner.files.write().await.remove(&id);
        // Wait out any in-flight write before deleting
        let _guard = match &entry {
            Some(entry) => Some(entry.lock().await),
            None => None,
        };

        let removed_partial = remove_if_exists(&self.partial_path(id)).await?;
        let removed_complete = remove_if_exists(&self.complete_path(id)).await?;

        tracing::debug!(
            upload_id = %id,
            removed_partial = removed_partial,
            removed_complete = removed_complete,
            "Upload data discarded"
        );
        Ok(())
    }

    async fn detach(&self, id: Uuid) -> StorageResult<()> {
        self.inner.files.write().await.remove(&id);
        Ok(())
    }

    async fn recover(&self, id: Uuid, declared_length: u64, offset: u64) -> StorageResult<()> {
        if offset > declared_length {
            return Err(StorageError::SizeExceeded {
                id,
                declared: declared_length,
                attempted: offset,
            });
        }

        let mut files = self.inner.files.write().await;
        if files.contains_key(&id) {
            return Ok(());
        }

        let complete = self.complete_path(id);
        if offset == declared_length && fs::try_exists(&complete).await.unwrap_or(false) {
            files.insert(
                id,
                Arc::new(Mutex::new(PartialFile {
                    declared_length,
                    offset,
                    finalized: Some(complete),
                })),
            );
            tracing::debug!(upload_id = %id, "Recovered finalized upload");
            return Ok(());
        }

        let path = self.partial_path(id);
        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => StorageError::NotFound(id),
                _ => StorageError::IoError(e),
            })?;

        let on_disk = file.metadata().await?.len();
        if on_disk < offset {
            return Err(StorageError::IncompleteUpload {
                id,
                offset: on_disk,
                declared: declared_length,
            });
        }
        if on_disk > offset {
            file.set_len(offset).await?;
            file.sync_data().await?;
            tracing::warn!(
                upload_id = %id,
                recorded_offset = offset,
                dropped_bytes = on_disk - offset,
                "Truncated unrecorded bytes from partial file"
            );
        }

        files.insert(
            id,
            Arc::new(Mutex::new(PartialFile {
                declared_length,
                offset,
                finalized: None,
            })),
        );
        tracing::debug!(upload_id = %id, offset = offset, "Recovered partial upload");
        Ok(())
    }

    async fn list_partials(&self) -> StorageResult<Vec<Uuid>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.inner.partial_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PARTIAL_EXTENSION) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            {
                ids.push(id);
            }
        }

        Ok(ids)
    }
}
