use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::fs;
use tracing::{info, warn};

use crate::schedule::types::ArtifactFormat;

/// Local cache layout: one directory per task id under a shared root,
/// holding the input payload and the fixed-name result artifacts. The
/// directory's lifetime is coupled to the registry record but the two
/// are independently removable.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn entry_dir(&self, task_id: &str) -> PathBuf {
        self.root.join(task_id)
    }

    pub async fn create_entry(&self, task_id: &str) -> Result<PathBuf> {
        let dir = self.entry_dir(task_id);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    pub async fn write_input(&self, task_id: &str, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.entry_dir(task_id).join(filename);
        fs::write(&path, bytes).await?;
        Ok(path)
    }

    pub fn artifact_path(&self, task_id: &str, format: ArtifactFormat) -> PathBuf {
        self.entry_dir(task_id).join(format.file_name())
    }

    pub async fn write_artifact(
        &self,
        task_id: &str,
        format: ArtifactFormat,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let path = self.artifact_path(task_id, format);
        fs::write(&path, bytes).await?;
        info!("Wrote {} artifact for task {}", format.file_name(), task_id);
        Ok(path)
    }

    pub async fn read_artifact(
        &self,
        task_id: &str,
        format: ArtifactFormat,
    ) -> Result<Option<Vec<u8>>> {
        let path = self.artifact_path(task_id, format);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes a task's directory and everything in it. Idempotent: a
    /// missing entry deletes zero files and is not an error.
    pub async fn remove_entry(&self, task_id: &str) -> Result<usize> {
        let dir = self.entry_dir(task_id);
        let mut files_deleted = 0;

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files_deleted += 1;
            }
        }

        fs::remove_dir_all(&dir).await?;
        info!("Removed cache entry for task {} ({} files)", task_id, files_deleted);
        Ok(files_deleted)
    }

    /// Names of all entry directories under the root, for orphan
    /// reconciliation against the registry.
    pub async fn list_entries(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => warn!("Skipping non-UTF8 cache entry {:?}", name),
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn entry_roundtrip_and_removal() {
        let dir = tempdir().unwrap();
        let cache = CacheStore::new(dir.path());
        cache.ensure_root().await.unwrap();

        cache.create_entry("task-1").await.unwrap();
        cache.write_input("task-1", "in.wav", b"abc").await.unwrap();
        cache
            .write_artifact("task-1", ArtifactFormat::Structured, b"{}")
            .await
            .unwrap();

        let read = cache
            .read_artifact("task-1", ArtifactFormat::Structured)
            .await
            .unwrap();
        assert_eq!(read.as_deref(), Some(b"{}".as_slice()));

        assert_eq!(cache.remove_entry("task-1").await.unwrap(), 2);
        // Second removal is a no-op.
        assert_eq!(cache.remove_entry("task-1").await.unwrap(), 0);
        assert!(cache
            .read_artifact("task-1", ArtifactFormat::Structured)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn lists_entry_directories() {
        let dir = tempdir().unwrap();
        let cache = CacheStore::new(dir.path());
        cache.ensure_root().await.unwrap();
        cache.create_entry("task-a").await.unwrap();
        cache.create_entry("task-b").await.unwrap();

        let mut names = cache.list_entries().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["task-a", "task-b"]);
    }
}
