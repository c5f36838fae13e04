use std::path::PathBuf;
use tempfile::TempDir;

/// Temporary upload root, removed when dropped.
pub struct TestStorage {
    pub temp_dir: TempDir,
    pub base_path: PathBuf,
}

impl TestStorage {
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let base_path = temp_dir.path().join("uploads");
        Self {
            temp_dir,
            base_path,
        }
    }

    pub fn partial_dir(&self) -> PathBuf {
        self.base_path.join("partial")
    }

    pub fn complete_dir(&self) -> PathBuf {
        self.base_path.join("complete")
    }
}

impl Default for TestStorage {
    fn default() -> Self {
        Self::new()
    }
}
