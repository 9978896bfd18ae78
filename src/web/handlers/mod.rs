use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::error::ServiceError;
use crate::AppContext;

pub mod tasks;
pub mod transcribe;

pub fn router(ctx: Arc<AppContext>) -> Router {
    // Multipart bodies need headroom over the payload ceiling itself.
    let body_limit = (ctx.config.max_upload_bytes as usize).saturating_add(1024 * 1024);

    Router::new()
        .route("/transcribe", post(transcribe::submit_file))
        .route("/transcribe/url", post(transcribe::submit_url))
        .route("/transcribe/remote", post(transcribe::submit_remote))
        .route("/status/:task_id", get(tasks::status))
        .route("/download/:task_id", get(tasks::download))
        .route("/release/:task_id", delete(tasks::release))
        .route("/queue", get(tasks::queue))
        .route("/health", get(tasks::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(ctx)
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Maps a domain error onto its status code; anything unrecognized is an
/// internal error.
pub(crate) fn error_status(err: &anyhow::Error) -> StatusCode {
    match err.downcast_ref::<ServiceError>() {
        Some(ServiceError::Validation(_)) => StatusCode::BAD_REQUEST,
        Some(ServiceError::UnsupportedMedia(_)) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        Some(ServiceError::PayloadTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
        Some(ServiceError::Configuration(_)) => StatusCode::FAILED_DEPENDENCY,
        Some(ServiceError::NotFound(_)) => StatusCode::NOT_FOUND,
        Some(ServiceError::AlreadyExists(_)) => StatusCode::CONFLICT,
        Some(ServiceError::Authorization(_)) => StatusCode::FORBIDDEN,
        Some(ServiceError::Forbidden(_)) => StatusCode::FORBIDDEN,
        Some(ServiceError::NotReady(_)) => StatusCode::CONFLICT,
        Some(ServiceError::Downstream(_)) => StatusCode::BAD_GATEWAY,
        Some(ServiceError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        None => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn fail(err: anyhow::Error) -> Response {
    let status = error_status(&err);
    (status, Json(ApiResponse::<()>::error(err.to_string()))).into_response()
}

/// Every task-scoped operation requires the caller to identify itself.
pub(crate) fn client_id(headers: &HeaderMap) -> Result<String, Response> {
    headers
        .get("client-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            fail(ServiceError::Validation("client-id header is required".to_string()).into())
        })
}
