use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use resumable_core::{
    FinalizeCallback, FinalizeRequest, FinalizedResource, OwnerId, Ownership, OwnershipCheck,
    TargetKind, UploadMetadata,
};
use resumable_storage::ChunkReader;

/// One invocation of the finalize callback.
#[derive(Debug, Clone)]
pub struct FinalizeCall {
    pub request: FinalizeRequest,
    /// File contents at the time of the call.
    pub contents: Vec<u8>,
    pub succeeded: bool,
}

/// Finalize callback that records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingFinalizer {
    calls: Mutex<Vec<FinalizeCall>>,
    failing: AtomicBool,
}

impl RecordingFinalizer {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<FinalizeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn successful_calls(&self) -> Vec<FinalizeCall> {
        self.calls().into_iter().filter(|c| c.succeeded).collect()
    }
}

#[async_trait]
impl FinalizeCallback for RecordingFinalizer {
    async fn finalize(&self, request: FinalizeRequest) -> anyhow::Result<FinalizedResource> {
        let contents = tokio::fs::read(&request.path).await?;
        let succeeded = !self.failing.load(Ordering::SeqCst);
        let resource_id = format!("res-{}", request.upload_id);

        self.calls.lock().unwrap().push(FinalizeCall {
            request,
            contents,
            succeeded,
        });

        if !succeeded {
            return Err(anyhow::anyhow!("database unavailable"));
        }
        Ok(FinalizedResource { resource_id })
    }
}

/// Ownership check backed by a fixed resource -> owner table.
#[derive(Default)]
pub struct StaticOwnership {
    resources: Mutex<HashMap<String, OwnerId>>,
}

impl StaticOwnership {
    pub fn add_resource(&self, resource_id: &str, owner: &str) {
        self.resources
            .lock()
            .unwrap()
            .insert(resource_id.to_string(), OwnerId::from(owner));
    }
}

#[async_trait]
impl OwnershipCheck for StaticOwnership {
    async fn check(&self, target: &TargetKind, owner: &OwnerId) -> anyhow::Result<Ownership> {
        let Some(resource_id) = target.resource_id() else {
            return Ok(Ownership::Owned);
        };
        Ok(match self.resources.lock().unwrap().get(resource_id) {
            Some(actual) if actual == owner => Ownership::Owned,
            Some(_) => Ownership::NotOwned,
            None => Ownership::Missing,
        })
    }
}

pub fn body(bytes: &[u8]) -> ChunkReader {
    Box::pin(std::io::Cursor::new(bytes.to_vec()))
}

pub fn empty_body() -> ChunkReader {
    body(&[])
}

pub fn metadata(title: &str) -> UploadMetadata {
    [("title", title)].into_iter().collect()
}

pub fn replace(resource_id: &str) -> TargetKind {
    TargetKind::Replace {
        resource_id: resource_id.to_string(),
    }
}
