use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use super::{client_id, fail, ApiResponse};
use crate::schedule::types::{ArtifactFormat, OutputRef, ReleaseReport, Task, TaskStatus};
use crate::AppContext;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub outputs: Vec<OutputRef>,
    pub error: Option<String>,
}

impl From<Task> for StatusResponse {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            created_at: task.created_at,
            dispatched_at: task.dispatched_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            last_accessed_at: task.last_accessed_at,
            outputs: task.outputs,
            error: task.error,
        }
    }
}

pub async fn status(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let client = match client_id(&headers) {
        Ok(client) => client,
        Err(response) => return response,
    };

    match ctx.task_manager.get_checked(&task_id, &client).await {
        Ok(task) => (
            StatusCode::OK,
            Json(ApiResponse::success(StatusResponse::from(task))),
        )
            .into_response(),
        Err(e) => fail(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub fmt: Option<String>,
}

pub async fn download(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Response {
    let client = match client_id(&headers) {
        Ok(client) => client,
        Err(response) => return response,
    };
    let format = match ArtifactFormat::parse(query.fmt.as_deref().unwrap_or("structured")) {
        Ok(format) => format,
        Err(e) => return fail(e.into()),
    };

    match ctx.task_manager.fetch_artifact(&task_id, &client, format).await {
        Ok((bytes, content_type)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", format.file_name()),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => fail(e),
    }
}

pub async fn release(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let client = match client_id(&headers) {
        Ok(client) => client,
        Err(response) => return response,
    };

    // Unknown ids are a 404; the manager-level release itself is
    // idempotent for the reaper's benefit.
    if let Err(e) = ctx.task_manager.get_checked(&task_id, &client).await {
        return fail(e);
    }

    match ctx.task_manager.release(&task_id, &client).await {
        Ok(report) => (StatusCode::OK, Json(ApiResponse::<ReleaseReport>::success(report))).into_response(),
        Err(e) => {
            error!("Release of task {} failed: {}", task_id, e);
            fail(e)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub queued: u64,
    pub tracked: u64,
}

pub async fn queue(State(ctx): State<Arc<AppContext>>) -> Response {
    let queued = match ctx.task_manager.queue_depth().await {
        Ok(queued) => queued,
        Err(e) => return fail(e),
    };
    let tracked = match ctx.task_manager.tracked().await {
        Ok(tracked) => tracked,
        Err(e) => return fail(e),
    };

    (StatusCode::OK, Json(ApiResponse::success(QueueResponse { queued, tracked }))).into_response()
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub database: String,
    pub cache: String,
    pub remote_storage: String,
}

pub async fn health(State(ctx): State<Arc<AppContext>>) -> Response {
    let database = match ctx.task_manager.tracked().await {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("error: {}", e),
    };
    let cache = match tokio::fs::metadata(ctx.task_manager.cache().root()).await {
        Ok(meta) if meta.is_dir() => "ok".to_string(),
        Ok(_) => "error: cache root is not a directory".to_string(),
        Err(e) => format!("error: {}", e),
    };
    let remote_storage = if ctx.task_manager.remote_configured() {
        "ok".to_string()
    } else {
        "not_configured".to_string()
    };

    (
        StatusCode::OK,
        Json(HealthResponse { database, cache, remote_storage }),
    )
        .into_response()
}
