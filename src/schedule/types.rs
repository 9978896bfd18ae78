use std::fmt::Display;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServiceError;

/// Task lifecycle. Transitions form a DAG with two terminal states;
/// the enum is closed so an invalid status cannot be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    PendingReceived,
    PendingDispatched,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::PendingReceived => "PENDING_RECEIVED",
            TaskStatus::PendingDispatched => "PENDING_DISPATCHED",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Still waiting for a worker to pick it up.
    pub fn is_queued(&self) -> bool {
        matches!(self, TaskStatus::PendingReceived | TaskStatus::PendingDispatched)
    }

    pub fn can_transition(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::PendingReceived, TaskStatus::PendingDispatched)
                | (TaskStatus::PendingReceived, TaskStatus::Failed)
                | (TaskStatus::PendingDispatched, TaskStatus::Processing)
                | (TaskStatus::PendingDispatched, TaskStatus::Failed)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the payload entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionKind {
    FileUpload,
    UrlDownload,
    RemoteObject,
}

/// A result artifact location: a path in the local cache, or a key in
/// remote object storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "ref")]
pub enum OutputRef {
    Local(PathBuf),
    Remote(String),
}

/// The two artifact forms every completed task produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Structured,
    Rendered,
}

impl ArtifactFormat {
    pub fn file_name(&self) -> &'static str {
        match self {
            ArtifactFormat::Structured => "transcript.json",
            ArtifactFormat::Rendered => "transcript.md",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ArtifactFormat::Structured => "application/json; charset=utf-8",
            ArtifactFormat::Rendered => "text/markdown; charset=utf-8",
        }
    }

    pub fn object_ext(&self) -> &'static str {
        match self {
            ArtifactFormat::Structured => "json",
            ArtifactFormat::Rendered => "md",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ServiceError> {
        match s {
            "structured" => Ok(ArtifactFormat::Structured),
            "rendered" => Ok(ArtifactFormat::Rendered),
            other => Err(ServiceError::Validation(format!(
                "invalid format '{}', expected 'structured' or 'rendered'",
                other
            ))),
        }
    }
}

/// Where a submission's payload comes from.
#[derive(Debug, Clone)]
pub enum InputSource {
    Upload { bytes: Vec<u8>, filename: String, content_type: String },
    Url { url: String },
    RemoteObject { key: String },
}

impl InputSource {
    pub fn kind(&self) -> SubmissionKind {
        match self {
            InputSource::Upload { .. } => SubmissionKind::FileUpload,
            InputSource::Url { .. } => SubmissionKind::UrlDownload,
            InputSource::RemoteObject { .. } => SubmissionKind::RemoteObject,
        }
    }
}

/// The central entity. One record exists per id; the registry is the
/// single source of truth for `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub client_id: String,
    pub status: TaskStatus,
    pub kind: SubmissionKind,
    pub input_path: PathBuf,
    pub original_filename: Option<String>,
    /// Caller-supplied logical path for remote publication. Presence
    /// opts the task out of local download retrieval.
    pub remote_path: Option<String>,
    pub outputs: Vec<OutputRef>,
    /// Opaque handle to the dispatched unit of work.
    pub worker_ref: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        client_id: impl Into<String>,
        kind: SubmissionKind,
        input_path: PathBuf,
        original_filename: Option<String>,
        remote_path: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("task-{}", Uuid::new_v4()),
            client_id: client_id.into(),
            status: TaskStatus::PendingReceived,
            kind,
            input_path,
            original_filename,
            remote_path,
            outputs: Vec::new(),
            worker_ref: None,
            error: None,
            created_at: now,
            updated_at: now,
            dispatched_at: None,
            started_at: None,
            completed_at: None,
            last_accessed_at: None,
        }
    }

    /// Moves the task forward, stamping the matching timestamp. Invalid
    /// transitions are rejected, which makes terminal states absorbing.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), ServiceError> {
        if !self.status.can_transition(next) {
            return Err(ServiceError::Validation(format!(
                "invalid status transition {} -> {} for task {}",
                self.status, next, self.id
            )));
        }
        let now = Utc::now();
        match next {
            TaskStatus::PendingDispatched => self.dispatched_at = Some(now),
            TaskStatus::Processing => self.started_at = Some(now),
            TaskStatus::Completed | TaskStatus::Failed => self.completed_at = Some(now),
            TaskStatus::PendingReceived => {}
        }
        self.status = next;
        Ok(())
    }

    /// Terminal failure with a captured, non-empty description.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), ServiceError> {
        self.transition(TaskStatus::Failed)?;
        let msg = error.into();
        self.error = Some(if msg.is_empty() { "unknown error".to_string() } else { msg });
        Ok(())
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}

/// Outcome of releasing a task's cache entry and registry record. Both
/// halves are reported individually so a partial failure is visible.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ReleaseReport {
    pub files_deleted: usize,
    pub registry_deleted: bool,
    pub errors: Vec<String>,
}
