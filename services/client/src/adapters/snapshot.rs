//! services/client/src/adapters/snapshot.rs
//!
//! Disk-backed implementation of the `SnapshotStore` port; progress
//! history survives client restarts through a single JSON file.

use async_trait::async_trait;
use mcq_core::ports::{PortError, PortResult, SnapshotStore};
use std::path::PathBuf;

pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self) -> PortResult<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PortError::Unexpected(format!(
                "failed to read snapshot {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn save(&self, snapshot: &str) -> PortResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                PortError::Unexpected(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        tokio::fs::write(&self.path, snapshot).await.map_err(|e| {
            PortError::Unexpected(format!(
                "failed to write snapshot {}: {e}",
                self.path.display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_snapshot_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("progress.json"));
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_creates_parent_directories_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("state/progress.json"));

        store.save(r#"{"history":[],"current":null}"#).await.unwrap();
        assert_eq!(
            store.load().await.unwrap().as_deref(),
            Some(r#"{"history":[],"current":null}"#)
        );
    }
}
