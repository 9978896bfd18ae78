use std::path::Path;

use anyhow::Result;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::ServiceError;

/// Downloads `url` into `dest`, enforcing the accepted media types and a
/// hard byte cap. The request timeout is carried by the client. The
/// download aborts as soon as the cap is crossed rather than buffering
/// the whole body.
pub async fn fetch_url(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    accepted_media_types: &[String],
    max_bytes: u64,
) -> Result<u64> {
    info!("Fetching payload from URL: {}", url);

    let mut response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            anyhow::Error::new(ServiceError::Timeout(format!("download from {} timed out", url)))
        } else {
            anyhow::Error::new(ServiceError::Downstream(format!("request to {} failed: {}", url, e)))
        }
    })?;

    if !response.status().is_success() {
        return Err(ServiceError::Downstream(format!(
            "download from {} failed with status {}",
            url,
            response.status()
        ))
        .into());
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    let type_accepted = accepted_media_types.iter().any(|t| content_type.contains(t.as_str()));
    let extension_accepted = url.to_ascii_lowercase().ends_with(".wav");
    if !type_accepted && !extension_accepted {
        return Err(ServiceError::UnsupportedMedia(format!(
            "content type '{}' is not accepted and URL has no recognized extension",
            content_type
        ))
        .into());
    }

    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(ServiceError::PayloadTooLarge { size: len, limit: max_bytes }.into());
        }
    }

    let mut file = fs::File::create(dest).await?;
    let mut written: u64 = 0;
    loop {
        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) if e.is_timeout() => {
                return Err(ServiceError::Timeout(format!("download from {} timed out", url)).into());
            }
            Err(e) => {
                return Err(ServiceError::Downstream(format!("download from {} aborted: {}", url, e)).into());
            }
        };
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(ServiceError::PayloadTooLarge { size: written, limit: max_bytes }.into());
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    info!("Fetched {} bytes from {}", written, url);
    Ok(written)
}
