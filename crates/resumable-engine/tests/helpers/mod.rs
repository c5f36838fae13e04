//! Test helpers: build an isolated upload engine for integration tests.
//!
//! Run from workspace root: `cargo test -p resumable-engine`.
#![allow(dead_code)]

pub mod fixtures;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;

use resumable_core::{OwnerId, UploadConfig};
use resumable_engine::{InMemoryUploadRegistry, UploadEngine};
use resumable_storage::LocalChunkStore;

pub use fixtures::{body, empty_body, metadata, replace, RecordingFinalizer, StaticOwnership};
pub use storage::TestStorage;

/// Engine plus the collaborators tests want to inspect.
pub struct TestEnv {
    pub engine: Arc<UploadEngine>,
    pub registry: Arc<InMemoryUploadRegistry>,
    pub store: Arc<LocalChunkStore>,
    pub finalizer: Arc<RecordingFinalizer>,
    pub ownership: Arc<StaticOwnership>,
    pub storage: TestStorage,
}

impl TestEnv {
    /// A second engine over the same registry and directories, as after a
    /// process restart with a persistent registry.
    pub async fn restarted(&self) -> UploadEngine {
        let store = LocalChunkStore::new(self.storage.partial_dir(), self.storage.complete_dir())
            .await
            .expect("Failed to reopen chunk store");
        UploadEngine::new(
            self.engine.config().clone(),
            self.registry.clone(),
            Arc::new(store),
            self.ownership.clone(),
            self.finalizer.clone(),
        )
    }
}

pub fn test_config(storage: &TestStorage) -> UploadConfig {
    UploadConfig {
        max_concurrent_per_owner: 3,
        idle_timeout: Duration::from_secs(3600),
        sweep_interval: Duration::from_secs(60),
        max_new_file_bytes: 1024 * 1024,
        max_replacement_bytes: 512 * 1024,
        tombstone_retention: Duration::from_secs(3600),
        storage_path: storage.base_path.clone(),
    }
}

pub async fn setup_engine() -> TestEnv {
    setup_engine_with(|_| {}).await
}

pub async fn setup_engine_with(configure: impl FnOnce(&mut UploadConfig)) -> TestEnv {
    let _ = resumable_core::init_telemetry(None, false);

    let storage = TestStorage::new();
    let mut config = test_config(&storage);
    configure(&mut config);

    let registry = Arc::new(InMemoryUploadRegistry::new());
    let store = Arc::new(
        LocalChunkStore::from_config(&config)
            .await
            .expect("Failed to create chunk store"),
    );
    let finalizer = Arc::new(RecordingFinalizer::default());
    let ownership = Arc::new(StaticOwnership::default());

    let engine = Arc::new(UploadEngine::new(
        config,
        registry.clone(),
        store.clone(),
        ownership.clone(),
        finalizer.clone(),
    ));

    TestEnv {
        engine,
        registry,
        store,
        finalizer,
        ownership,
        storage,
    }
}

pub fn owner(id: &str) -> OwnerId {
    OwnerId::from(id)
}
