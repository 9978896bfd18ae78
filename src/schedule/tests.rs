use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use tempfile::TempDir;

use crate::config::Config;
use crate::error::ServiceError;
use crate::schedule::processors::{Processor, ProcessorOutput};
use crate::schedule::reaper::ExpiryReaper;
use crate::schedule::scheduler::{TaskManager, TaskWorker};
use crate::schedule::types::{ArtifactFormat, InputSource, OutputRef, TaskStatus};
use crate::storage::cache::CacheStore;
use crate::storage::remote::RemoteStore;
use crate::storage::task::sqlite::SqliteTaskStorage;
use crate::storage::task::TaskStorage;

struct MockProcessor;

#[async_trait]
impl Processor for MockProcessor {
    async fn process(&self, input: &Path) -> Result<ProcessorOutput> {
        Ok(ProcessorOutput {
            structured: json!({ "source": input.file_name().unwrap().to_str(), "segments": [] }),
            rendered: "# Transcript\n\n_No segments produced._\n".to_string(),
        })
    }
}

struct FailingProcessor;

#[async_trait]
impl Processor for FailingProcessor {
    async fn process(&self, _input: &Path) -> Result<ProcessorOutput> {
        Err(anyhow::anyhow!("decode blew up"))
    }
}

/// In-memory stand-in for the S3 seam.
#[derive(Default)]
struct MockRemoteStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_puts: bool,
}

impl MockRemoteStore {
    fn failing() -> Self {
        Self { objects: Mutex::new(HashMap::new()), fail_puts: true }
    }

    fn insert(&self, key: &str, bytes: &[u8]) {
        self.objects.lock().unwrap().insert(key.to_string(), bytes.to_vec());
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn put_object(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<()> {
        if self.fail_puts {
            return Err(ServiceError::Downstream("bucket unavailable".to_string()).into());
        }
        self.insert(key, bytes);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("remote object {}", key)).into())
    }
}

struct Rig {
    _dir: TempDir,
    storage: Arc<SqliteTaskStorage>,
    cache: Arc<CacheStore>,
    config: Arc<Config>,
    manager: Arc<TaskManager>,
}

async fn rig(remote: Option<Arc<dyn RemoteStore>>, tweak: impl FnOnce(&mut Config)) -> Rig {
    let dir = TempDir::new().unwrap();
    let mut config = Config {
        database_url: format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("storage.db").display()
        ),
        cache_dir: dir.path().join("cache"),
        ..Config::default()
    };
    tweak(&mut config);
    let config = Arc::new(config);

    let storage = Arc::new(SqliteTaskStorage::new(&config.database_url).await.unwrap());
    let cache = Arc::new(CacheStore::new(config.cache_dir.clone()));
    cache.ensure_root().await.unwrap();

    let manager = Arc::new(
        TaskManager::new(storage.clone(), cache.clone(), remote, config.clone()).unwrap(),
    );
    Rig { _dir: dir, storage, cache, config, manager }
}

fn upload(bytes: &[u8]) -> InputSource {
    InputSource::Upload {
        bytes: bytes.to_vec(),
        filename: "meeting.wav".to_string(),
        content_type: "audio/wav".to_string(),
    }
}

fn worker(rig: &Rig, processor: Arc<dyn Processor>) -> TaskWorker {
    TaskWorker::new(rig.manager.clone(), processor).with_interval(StdDuration::from_millis(1))
}

#[tokio::test]
async fn upload_lifecycle_reaches_completed_with_local_artifacts() {
    let rig = rig(None, |_| {}).await;

    let task = rig.manager.submit("c1", None, upload(b"RIFFdata")).await.unwrap();
    assert_eq!(task.status, TaskStatus::PendingDispatched);
    assert!(task.worker_ref.as_deref().unwrap().starts_with("work-"));
    assert!(task.input_path.exists());

    let found = worker(&rig, Arc::new(MockProcessor)).process_next().await.unwrap();
    assert!(found);

    let done = rig.manager.get_checked(&task.id, "c1").await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.started_at.is_some());
    assert!(done.completed_at.is_some());
    assert_eq!(done.outputs.len(), 2);
    assert!(done.outputs.iter().all(|o| matches!(o, OutputRef::Local(_))));

    let (bytes, content_type) = rig
        .manager
        .fetch_artifact(&task.id, "c1", ArtifactFormat::Structured)
        .await
        .unwrap();
    assert!(content_type.starts_with("application/json"));
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed["source"], "meeting.wav");

    let (md, content_type) = rig
        .manager
        .fetch_artifact(&task.id, "c1", ArtifactFormat::Rendered)
        .await
        .unwrap();
    assert!(content_type.starts_with("text/markdown"));
    assert!(md.starts_with(b"# Transcript"));

    // Retrieval refreshes the access stamp.
    let after = rig.manager.get_checked(&task.id, "c1").await.unwrap();
    assert!(after.last_accessed_at.is_some());
}

#[tokio::test]
async fn processor_failure_marks_the_task_failed() {
    let rig = rig(None, |_| {}).await;
    let task = rig.manager.submit("c1", None, upload(b"junk")).await.unwrap();

    worker(&rig, Arc::new(FailingProcessor)).process_next().await.unwrap();

    let failed = rig.manager.get_checked(&task.id, "c1").await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.error.as_deref().unwrap().contains("decode blew up"));

    let err = rig
        .manager
        .fetch_artifact(&task.id, "c1", ArtifactFormat::Structured)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ServiceError>(),
        Some(ServiceError::NotReady(_))
    ));
}

#[tokio::test]
async fn rejected_submissions_leave_no_trace() {
    let rig = rig(None, |c| c.max_upload_bytes = 16).await;

    let err = rig
        .manager
        .submit("c1", Some("../escape".to_string()), upload(b"x"))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ServiceError>(),
        Some(ServiceError::Validation(_))
    ));

    let err = rig
        .manager
        .submit("c1", None, upload(&[0u8; 64]))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ServiceError>(),
        Some(ServiceError::PayloadTooLarge { size: 64, limit: 16 })
    ));

    let bad_type = InputSource::Upload {
        bytes: b"x".to_vec(),
        filename: "notes.txt".to_string(),
        content_type: "text/plain".to_string(),
    };
    let err = rig.manager.submit("c1", None, bad_type).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ServiceError>(),
        Some(ServiceError::UnsupportedMedia(_))
    ));

    assert_eq!(rig.manager.tracked().await.unwrap(), 0);
    assert!(rig.cache.list_entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn remote_path_without_remote_storage_is_a_configuration_error() {
    let rig = rig(None, |_| {}).await;
    let err = rig
        .manager
        .submit("c1", Some("meetings/standup".to_string()), upload(b"x"))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ServiceError>(),
        Some(ServiceError::Configuration(_))
    ));
}

#[tokio::test]
async fn remote_tasks_publish_and_refuse_local_download() {
    let remote = Arc::new(MockRemoteStore::default());
    let rig = rig(Some(remote.clone()), |_| {}).await;

    let task = rig
        .manager
        .submit("c1", Some("meetings/standup".to_string()), upload(b"RIFFdata"))
        .await
        .unwrap();
    worker(&rig, Arc::new(MockProcessor)).process_next().await.unwrap();

    let done = rig.manager.get_checked(&task.id, "c1").await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.outputs.iter().all(|o| matches!(o, OutputRef::Remote(_))));
    assert_eq!(
        remote.keys(),
        vec![
            "transcriber/c1/meetings/standup.json".to_string(),
            "transcriber/c1/meetings/standup.md".to_string(),
        ]
    );

    let err = rig
        .manager
        .fetch_artifact(&task.id, "c1", ArtifactFormat::Structured)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ServiceError>(),
        Some(ServiceError::Forbidden(_))
    ));
}

#[tokio::test]
async fn publish_failure_fails_the_task_but_keeps_local_artifacts() {
    let remote = Arc::new(MockRemoteStore::failing());
    let rig = rig(Some(remote), |_| {}).await;

    let task = rig
        .manager
        .submit("c1", Some("meetings/standup".to_string()), upload(b"RIFFdata"))
        .await
        .unwrap();
    worker(&rig, Arc::new(MockProcessor)).process_next().await.unwrap();

    let failed = rig.manager.get_checked(&task.id, "c1").await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.error.as_deref().unwrap().contains("remote publish failed"));
    assert!(failed.outputs.is_empty());

    // Kept on disk for diagnostics even though retrieval is refused.
    assert!(rig
        .cache
        .read_artifact(&task.id, ArtifactFormat::Structured)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn remote_object_submissions_pull_from_the_bucket() {
    let remote = Arc::new(MockRemoteStore::default());
    remote.insert("incoming/call.wav", b"RIFFremote");
    let rig = rig(Some(remote), |_| {}).await;

    let task = rig
        .manager
        .submit("c1", None, InputSource::RemoteObject { key: "incoming/call.wav".to_string() })
        .await
        .unwrap();
    assert_eq!(task.original_filename.as_deref(), Some("call.wav"));
    assert_eq!(std::fs::read(&task.input_path).unwrap(), b"RIFFremote");

    let err = rig
        .manager
        .submit("c1", None, InputSource::RemoteObject { key: "incoming/missing.wav".to_string() })
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ServiceError>(),
        Some(ServiceError::NotFound(_))
    ));
}

#[tokio::test]
async fn foreign_clients_are_refused() {
    let rig = rig(None, |_| {}).await;
    let task = rig.manager.submit("c1", None, upload(b"x")).await.unwrap();

    let err = rig.manager.get_checked(&task.id, "someone-else").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ServiceError>(),
        Some(ServiceError::Authorization(_))
    ));

    let err = rig.manager.release(&task.id, "someone-else").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ServiceError>(),
        Some(ServiceError::Authorization(_))
    ));
    assert_eq!(rig.manager.tracked().await.unwrap(), 1);
}

#[tokio::test]
async fn release_removes_both_halves_and_is_idempotent() {
    let rig = rig(None, |_| {}).await;
    let task = rig.manager.submit("c1", None, upload(b"RIFFdata")).await.unwrap();
    worker(&rig, Arc::new(MockProcessor)).process_next().await.unwrap();

    let report = rig.manager.release(&task.id, "c1").await.unwrap();
    assert_eq!(report.files_deleted, 3); // input + both artifacts
    assert!(report.registry_deleted);
    assert!(report.errors.is_empty());
    assert_eq!(rig.manager.tracked().await.unwrap(), 0);

    let again = rig.manager.release(&task.id, "c1").await.unwrap();
    assert_eq!(again.files_deleted, 0);
    assert!(!again.registry_deleted);
    assert!(again.errors.is_empty());
}

#[tokio::test]
async fn queue_depth_counts_waiting_tasks() {
    let rig = rig(None, |_| {}).await;
    rig.manager.submit("c1", None, upload(b"a")).await.unwrap();
    rig.manager.submit("c1", None, upload(b"b")).await.unwrap();
    assert_eq!(rig.manager.queue_depth().await.unwrap(), 2);
    assert_eq!(rig.manager.tracked().await.unwrap(), 2);

    worker(&rig, Arc::new(MockProcessor)).process_next().await.unwrap();
    assert_eq!(rig.manager.queue_depth().await.unwrap(), 1);
    assert_eq!(rig.manager.tracked().await.unwrap(), 2);
}

#[tokio::test]
async fn reaper_fails_stuck_tasks_and_reclaims_expired_ones() {
    let rig = rig(None, |c| {
        c.stale_after = StdDuration::from_secs(3600);
        c.retention = StdDuration::from_secs(7 * 24 * 3600);
    })
    .await;
    let reaper = ExpiryReaper::new(rig.storage.clone(), rig.cache.clone(), &rig.config);

    let stuck = rig.manager.submit("c1", None, upload(b"a")).await.unwrap();
    let expired = rig.manager.submit("c1", None, upload(b"b")).await.unwrap();
    let fresh = rig.manager.submit("c1", None, upload(b"c")).await.unwrap();

    let backdate = |hours: i64| -> crate::storage::task::TaskMutator {
        Box::new(move |t| {
            t.created_at = Utc::now() - Duration::hours(hours);
            Ok(())
        })
    };
    rig.storage.update(&stuck.id, backdate(2)).await.unwrap();
    rig.storage.update(&expired.id, backdate(8 * 24)).await.unwrap();

    let stats = reaper.sweep().await;
    assert_eq!(stats.examined, 3);
    assert_eq!(stats.marked_stale, 2); // both backdated tasks were non-terminal
    assert_eq!(stats.reclaimed, 1);
    assert!(stats.errors.is_empty());

    let stuck = rig.manager.get_checked(&stuck.id, "c1").await.unwrap();
    assert_eq!(stuck.status, TaskStatus::Failed);
    assert!(stuck.error.as_deref().unwrap().contains("abandoned"));

    assert!(rig.storage.get(&expired.id).await.unwrap().is_none());
    assert_eq!(rig.cache.remove_entry(&expired.id).await.unwrap(), 0);

    let fresh = rig.manager.get_checked(&fresh.id, "c1").await.unwrap();
    assert_eq!(fresh.status, TaskStatus::PendingDispatched);

    // A second pass finds nothing new to do.
    let stats = reaper.sweep().await;
    assert_eq!(stats.marked_stale, 0);
    assert_eq!(stats.reclaimed, 0);
    assert_eq!(stats.orphan_entries_removed, 0);
}

#[tokio::test]
async fn reaper_removes_orphan_cache_entries() {
    let rig = rig(None, |c| {
        // Zero staleness so freshly created directories are not spared.
        c.stale_after = StdDuration::from_secs(0);
        c.retention = StdDuration::from_secs(7 * 24 * 3600);
    })
    .await;
    let reaper = ExpiryReaper::new(rig.storage.clone(), rig.cache.clone(), &rig.config);

    rig.cache.create_entry("task-orphan").await.unwrap();
    rig.cache.write_input("task-orphan", "in.wav", b"x").await.unwrap();

    let stats = reaper.sweep().await;
    assert_eq!(stats.orphan_entries_removed, 1);
    assert!(rig.cache.list_entries().await.unwrap().is_empty());
}
