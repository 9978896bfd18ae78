use anyhow::Result;
use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use tracing::info;

use crate::config::RemoteConfig;
use crate::error::ServiceError;

/// Seam to external object storage. The service only ever puts result
/// artifacts and gets submitted payloads; retention of remote objects is
/// the client's own responsibility.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn put_object(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()>;
    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;
}

/// Builds the published object key for one artifact of a task:
/// `transcriber/{client_id}/{remote_path}.{ext}`.
pub fn object_key(client_id: &str, remote_path: &str, ext: &str) -> String {
    let safe_client: String = client_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    format!("transcriber/{}/{}.{}", safe_client, remote_path, ext)
}

/// S3-compatible implementation (AWS or a custom endpoint such as MinIO).
pub struct S3RemoteStore {
    bucket: Box<Bucket>,
}

impl S3RemoteStore {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let region = match &config.endpoint {
            Some(endpoint) => Region::Custom {
                region: config.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => config.region.parse()?,
        };
        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )?;
        let bucket = Bucket::new(&config.bucket, region, credentials)?.with_path_style();
        info!("Remote storage configured for bucket {}", config.bucket);
        Ok(Self { bucket })
    }
}

#[async_trait]
impl RemoteStore for S3RemoteStore {
    async fn put_object(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let response = self
            .bucket
            .put_object_with_content_type(key, bytes, content_type)
            .await?;
        if response.status_code() != 200 {
            return Err(ServiceError::Downstream(format!(
                "put of object {} returned status {}",
                key,
                response.status_code()
            ))
            .into());
        }
        info!("Published {} bytes to remote object {}", bytes.len(), key);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let response = self.bucket.get_object(key).await?;
        match response.status_code() {
            200 => Ok(response.bytes().to_vec()),
            404 => Err(ServiceError::NotFound(format!("remote object {}", key)).into()),
            status => Err(ServiceError::Downstream(format!(
                "get of object {} returned status {}",
                key, status
            ))
            .into()),
        }
    }
}
