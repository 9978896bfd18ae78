use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::ServiceError;
use crate::schedule::processors::ProcessorOutput;
use crate::schedule::types::{
    ArtifactFormat, InputSource, OutputRef, ReleaseReport, Task, TaskStatus,
};
use crate::storage::cache::CacheStore;
use crate::storage::remote::{object_key, RemoteStore};
use crate::storage::task::TaskStorage;
use crate::utils::http;

/// Owns the submission-to-dispatch protocol and every client-facing task
/// operation. All shared handles are injected once at process start.
pub struct TaskManager {
    storage: Arc<dyn TaskStorage>,
    cache: Arc<CacheStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    config: Arc<Config>,
    client: reqwest::Client,
}

impl TaskManager {
    pub fn new(
        storage: Arc<dyn TaskStorage>,
        cache: Arc<CacheStore>,
        remote: Option<Arc<dyn RemoteStore>>,
        config: Arc<Config>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()?;
        Ok(Self { storage, cache, remote, config, client })
    }

    pub fn storage(&self) -> &Arc<dyn TaskStorage> {
        &self.storage
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn remote_configured(&self) -> bool {
        self.remote.is_some()
    }

    /// Validates the submission, acquires the payload into a fresh cache
    /// entry, creates the record, then dispatches it. The record is
    /// durably written before the id is returned, so a status poll right
    /// after submission can never miss. Dispatch failure after creation
    /// compensates by marking the task failed instead of leaving it
    /// stuck; a crash between the steps is reconciled by the reaper.
    pub async fn submit(
        &self,
        client_id: &str,
        remote_path: Option<String>,
        source: InputSource,
    ) -> Result<Task> {
        if client_id.trim().is_empty() {
            return Err(ServiceError::Validation("client_id is required".to_string()).into());
        }
        if let Some(path) = &remote_path {
            validate_remote_path(path)?;
            if self.remote.is_none() {
                return Err(ServiceError::Configuration(
                    "remote_path was supplied but remote storage is not configured".to_string(),
                )
                .into());
            }
        }
        if let InputSource::Upload { bytes, content_type, .. } = &source {
            let media = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            if !self.config.accepted_media_types.iter().any(|t| t == &media) {
                return Err(ServiceError::UnsupportedMedia(media).into());
            }
            if bytes.len() as u64 > self.config.max_upload_bytes {
                return Err(ServiceError::PayloadTooLarge {
                    size: bytes.len() as u64,
                    limit: self.config.max_upload_bytes,
                }
                .into());
            }
        }
        if matches!(source, InputSource::RemoteObject { .. }) && self.remote.is_none() {
            return Err(ServiceError::Configuration(
                "remote storage is not configured".to_string(),
            )
            .into());
        }

        let mut task = Task::new(client_id, source.kind(), PathBuf::new(), None, remote_path);

        self.cache.create_entry(&task.id).await?;
        match self.acquire(&task.id, source).await {
            Ok((input_path, original_filename)) => {
                task.input_path = input_path;
                task.original_filename = original_filename;
            }
            Err(e) => {
                // Rejected submissions leave no trace behind.
                let _ = self.cache.remove_entry(&task.id).await;
                return Err(e);
            }
        }

        if let Err(e) = self.storage.create(&task).await {
            let _ = self.cache.remove_entry(&task.id).await;
            return Err(e);
        }
        info!("Created task {} for client {}", task.id, task.client_id);

        let worker_ref = format!("work-{}", Uuid::new_v4());
        let dispatched = self
            .storage
            .update(
                &task.id,
                Box::new(move |t| {
                    t.transition(TaskStatus::PendingDispatched)?;
                    t.worker_ref = Some(worker_ref.clone());
                    Ok(())
                }),
            )
            .await;

        match dispatched {
            Ok(task) => {
                info!("Dispatched task {} as {:?}", task.id, task.worker_ref);
                Ok(task)
            }
            Err(e) => {
                error!("Dispatch of task {} failed: {}", task.id, e);
                let msg = format!("dispatch failed: {}", e);
                if let Err(mark) = self.fail_task(&task.id, msg).await {
                    error!("Could not mark task {} as failed: {}", task.id, mark);
                }
                Err(ServiceError::Downstream(format!("dispatch of task {} failed", task.id)).into())
            }
        }
    }

    async fn acquire(
        &self,
        task_id: &str,
        source: InputSource,
    ) -> Result<(PathBuf, Option<String>)> {
        match source {
            InputSource::Upload { bytes, filename, .. } => {
                let name = sanitize_filename(&filename, "uploaded_audio.wav");
                let path = self.cache.write_input(task_id, &name, &bytes).await?;
                Ok((path, Some(filename)))
            }
            InputSource::Url { url } => {
                let raw = url.rsplit('/').next().unwrap_or("");
                let name = sanitize_filename(raw, "downloaded_audio.wav");
                let dest = self.cache.entry_dir(task_id).join(&name);
                http::fetch_url(
                    &self.client,
                    &url,
                    &dest,
                    &self.config.accepted_media_types,
                    self.config.max_upload_bytes,
                )
                .await?;
                Ok((dest, Some(name)))
            }
            InputSource::RemoteObject { key } => {
                let remote = self.remote.as_ref().ok_or_else(|| {
                    ServiceError::Configuration("remote storage is not configured".to_string())
                })?;
                let bytes = remote.get_object(&key).await?;
                if bytes.len() as u64 > self.config.max_upload_bytes {
                    return Err(ServiceError::PayloadTooLarge {
                        size: bytes.len() as u64,
                        limit: self.config.max_upload_bytes,
                    }
                    .into());
                }
                let raw = key.rsplit('/').next().unwrap_or("");
                let name = sanitize_filename(raw, "remote_audio.wav");
                let path = self.cache.write_input(task_id, &name, &bytes).await?;
                Ok((path, Some(name)))
            }
        }
    }

    /// Claims the oldest dispatched task, atomically moving it to
    /// PROCESSING. A task that turned terminal in the meantime is
    /// skipped with a warning (duplicate-delivery guard).
    pub async fn claim_next(&self) -> Result<Option<Task>> {
        let Some(candidate) = self.storage.next_dispatched().await? else {
            return Ok(None);
        };

        let claimed = self
            .storage
            .update(
                &candidate.id,
                Box::new(|t| {
                    t.transition(TaskStatus::Processing)?;
                    Ok(())
                }),
            )
            .await;

        match claimed {
            Ok(task) => Ok(Some(task)),
            Err(e) => {
                warn!("Skipping claim of task {}: {}", candidate.id, e);
                Ok(None)
            }
        }
    }

    /// Persists both artifact forms, publishes them remotely when the
    /// task asked for it, and marks the task COMPLETED. A publish
    /// failure after local success marks the task FAILED but keeps the
    /// local artifacts for diagnostics.
    pub async fn complete(&self, task: &Task, output: ProcessorOutput) -> Result<Task> {
        let structured = serde_json::to_vec_pretty(&output.structured)?;
        let json_path = self
            .cache
            .write_artifact(&task.id, ArtifactFormat::Structured, &structured)
            .await?;
        let md_path = self
            .cache
            .write_artifact(&task.id, ArtifactFormat::Rendered, output.rendered.as_bytes())
            .await?;

        let outputs = match &task.remote_path {
            Some(remote_path) => {
                match self.publish(task, remote_path, &structured, output.rendered.as_bytes()).await {
                    Ok(keys) => keys,
                    Err(e) => {
                        warn!(
                            "Remote publish for task {} failed, local artifacts retained: {}",
                            task.id, e
                        );
                        return self.fail_task(&task.id, format!("remote publish failed: {}", e)).await;
                    }
                }
            }
            None => vec![OutputRef::Local(json_path), OutputRef::Local(md_path)],
        };

        self.storage
            .update(
                &task.id,
                Box::new(move |t| {
                    t.transition(TaskStatus::Completed)?;
                    t.outputs = outputs.clone();
                    Ok(())
                }),
            )
            .await
    }

    async fn publish(
        &self,
        task: &Task,
        remote_path: &str,
        structured: &[u8],
        rendered: &[u8],
    ) -> Result<Vec<OutputRef>> {
        let remote = self.remote.as_ref().ok_or_else(|| {
            ServiceError::Configuration("remote storage is not configured".to_string())
        })?;

        let json_key = object_key(&task.client_id, remote_path, ArtifactFormat::Structured.object_ext());
        let md_key = object_key(&task.client_id, remote_path, ArtifactFormat::Rendered.object_ext());
        remote
            .put_object(&json_key, structured, ArtifactFormat::Structured.content_type())
            .await?;
        remote
            .put_object(&md_key, rendered, ArtifactFormat::Rendered.content_type())
            .await?;

        Ok(vec![OutputRef::Remote(json_key), OutputRef::Remote(md_key)])
    }

    pub async fn fail_task(&self, task_id: &str, message: String) -> Result<Task> {
        self.storage
            .update(
                task_id,
                Box::new(move |t| {
                    t.fail(message.clone())?;
                    Ok(())
                }),
            )
            .await
    }

    pub async fn get_checked(&self, task_id: &str, client_id: &str) -> Result<Task> {
        let task = self
            .storage
            .get(task_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("task {}", task_id)))?;
        authorize(&task, client_id)?;
        Ok(task)
    }

    /// Local artifact retrieval. Distinguishes "try again later"
    /// (NotReady), "wrong output mode" (Forbidden) and "gone" (NotFound).
    pub async fn fetch_artifact(
        &self,
        task_id: &str,
        client_id: &str,
        format: ArtifactFormat,
    ) -> Result<(Vec<u8>, &'static str)> {
        let task = self.get_checked(task_id, client_id).await?;

        if task.remote_path.is_some() {
            return Err(ServiceError::Forbidden(format!(
                "results of task {} were published to remote storage",
                task.id
            ))
            .into());
        }
        if task.status != TaskStatus::Completed {
            return Err(ServiceError::NotReady(format!(
                "task {} is {}",
                task.id, task.status
            ))
            .into());
        }

        let Some(bytes) = self.cache.read_artifact(task_id, format).await? else {
            error!(
                "Task {} claims completion but {} is missing from the cache",
                task_id,
                format.file_name()
            );
            return Err(ServiceError::NotFound(format!(
                "artifact {} for task {} is missing",
                format.file_name(),
                task_id
            ))
            .into());
        };

        self.storage
            .update(
                task_id,
                Box::new(|t| {
                    t.last_accessed_at = Some(Utc::now());
                    Ok(())
                }),
            )
            .await?;

        Ok((bytes, format.content_type()))
    }

    /// Deletes the cache entry and registry record together, reporting
    /// both halves individually. Idempotent: releasing an already
    /// released task deletes nothing and reports no error. Remote
    /// objects are never touched.
    pub async fn release(&self, task_id: &str, client_id: &str) -> Result<ReleaseReport> {
        if let Some(task) = self.storage.get(task_id).await? {
            authorize(&task, client_id)?;
            if task.status == TaskStatus::Processing {
                warn!(
                    "Releasing task {} while PROCESSING; the running worker is not interrupted",
                    task_id
                );
            }
        }

        let mut report = ReleaseReport::default();
        match self.cache.remove_entry(task_id).await {
            Ok(count) => report.files_deleted = count,
            Err(e) => report.errors.push(format!("cache entry: {}", e)),
        }
        match self.storage.delete(task_id).await {
            Ok(existed) => report.registry_deleted = existed,
            Err(e) => report.errors.push(format!("registry record: {}", e)),
        }

        info!(
            "Released task {}: {} files, registry deleted: {}",
            task_id, report.files_deleted, report.registry_deleted
        );
        Ok(report)
    }

    /// Units of work not yet picked up by a worker. Approximate under
    /// concurrent traffic; exactness is not a contract.
    pub async fn queue_depth(&self) -> Result<u64> {
        self.storage.count_queued().await
    }

    /// Total records in the registry regardless of status.
    pub async fn tracked(&self) -> Result<u64> {
        self.storage.count().await
    }
}

fn authorize(task: &Task, client_id: &str) -> Result<(), ServiceError> {
    if task.client_id != client_id {
        return Err(ServiceError::Authorization(format!(
            "client does not own task {}",
            task.id
        )));
    }
    Ok(())
}

/// A remote path must be relative, traversal-free and drawn from a
/// restricted character set.
pub fn validate_remote_path(path: &str) -> Result<(), ServiceError> {
    let reject = |reason: &str| {
        Err(ServiceError::Validation(format!("invalid remote_path: {}", reason)))
    };

    if path.is_empty() {
        return reject("must not be empty");
    }
    if path.starts_with('/') || path.ends_with('/') {
        return reject("must not start or end with '/'");
    }
    if !path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '.' | '-'))
    {
        return reject("contains characters outside [A-Za-z0-9/_.-]");
    }
    if path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return reject("must not contain empty, '.' or '..' segments");
    }
    Ok(())
}

/// Keeps filenames to a safe character set, bounded length, and never
/// empty.
pub(crate) fn sanitize_filename(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .take(100)
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_' || c == '.') {
        fallback.to_string()
    } else {
        cleaned
    }
}
