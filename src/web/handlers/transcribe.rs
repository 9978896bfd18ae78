use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use super::{client_id, fail, ApiResponse};
use crate::error::ServiceError;
use crate::schedule::types::InputSource;
use crate::AppContext;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub task_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitUrlRequest {
    pub url: String,
    pub remote_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRemoteRequest {
    pub remote_key: String,
    pub remote_path: Option<String>,
}

async fn submit(ctx: &AppContext, client: &str, remote_path: Option<String>, source: InputSource) -> Response {
    let remote_path = remote_path.filter(|p| !p.is_empty());
    match ctx.task_manager.submit(client, remote_path, source).await {
        Ok(task) => (
            StatusCode::CREATED,
            Json(ApiResponse::success(SubmitResponse { task_id: task.id })),
        )
            .into_response(),
        Err(e) => {
            error!("Submission failed: {}", e);
            fail(e)
        }
    }
}

/// Multipart file submission: a `file` part plus an optional
/// `remote_path` part.
pub async fn submit_file(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let client = match client_id(&headers) {
        Ok(client) => client,
        Err(response) => return response,
    };

    let mut upload: Option<InputSource> = None;
    let mut remote_path: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return fail(ServiceError::Validation(format!("malformed multipart body: {}", e)).into())
            }
        };
        match field.name() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("uploaded_audio.wav").to_string();
                let content_type = field.content_type().unwrap_or("").to_string();
                match field.bytes().await {
                    Ok(bytes) => {
                        upload = Some(InputSource::Upload {
                            bytes: bytes.to_vec(),
                            filename,
                            content_type,
                        })
                    }
                    Err(e) => {
                        return fail(
                            ServiceError::Validation(format!("could not read file part: {}", e)).into(),
                        )
                    }
                }
            }
            Some("remote_path") => match field.text().await {
                Ok(text) => remote_path = Some(text),
                Err(e) => {
                    return fail(
                        ServiceError::Validation(format!("could not read remote_path part: {}", e))
                            .into(),
                    )
                }
            },
            _ => {}
        }
    }

    let Some(source) = upload else {
        return fail(ServiceError::Validation("multipart field 'file' is required".to_string()).into());
    };

    submit(&ctx, &client, remote_path, source).await
}

pub async fn submit_url(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(req): Json<SubmitUrlRequest>,
) -> Response {
    let client = match client_id(&headers) {
        Ok(client) => client,
        Err(response) => return response,
    };
    if req.url.is_empty() || !(req.url.starts_with("http://") || req.url.starts_with("https://")) {
        return fail(ServiceError::Validation("url must be an http(s) URL".to_string()).into());
    }

    submit(&ctx, &client, req.remote_path, InputSource::Url { url: req.url }).await
}

pub async fn submit_remote(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(req): Json<SubmitRemoteRequest>,
) -> Response {
    let client = match client_id(&headers) {
        Ok(client) => client,
        Err(response) => return response,
    };
    if req.remote_key.is_empty() {
        return fail(ServiceError::Validation("remote_key is required".to_string()).into());
    }

    submit(&ctx, &client, req.remote_path, InputSource::RemoteObject { key: req.remote_key }).await
}
