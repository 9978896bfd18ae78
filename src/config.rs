use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_SQLITE_PATH: &str = "sqlite://./transcriber_data/database/storage.db?mode=rwc";
const DEFAULT_CACHE_DIR: &str = "./transcriber_data/cache";
const DEFAULT_LOG_DIR: &str = "./logs";
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETENTION_SECS: u64 = 7 * 24 * 3600;
const DEFAULT_STALE_AFTER_SECS: u64 = 6 * 3600;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 24 * 3600;

/// Process configuration, read once at startup and injected into every
/// component. Values come from the environment (with `.env` support).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub cache_dir: PathBuf,
    pub log_dir: String,
    /// Accepted submission content types.
    pub accepted_media_types: Vec<String>,
    pub max_upload_bytes: u64,
    /// Hard timeout for URL acquisition.
    pub fetch_timeout: Duration,
    pub worker_count: usize,
    /// Age after which a task's record and files are reclaimed
    /// regardless of outcome.
    pub retention: Duration,
    /// Age after which a non-terminal task is treated as abandoned.
    pub stale_after: Duration,
    pub sweep_interval: Duration,
    pub remote: Option<RemoteConfig>,
}

/// S3-compatible object storage settings. Absent unless the bucket and
/// both credentials are configured.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7200)),
            database_url: DEFAULT_SQLITE_PATH.to_string(),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            log_dir: DEFAULT_LOG_DIR.to_string(),
            accepted_media_types: vec!["audio/wav".to_string(), "audio/x-wav".to_string()],
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            worker_count: 1,
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            stale_after: Duration::from_secs(DEFAULT_STALE_AFTER_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            remote: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = Config::default();

        if let Some(addr) = env_opt("TRANSCRIBER_BIND") {
            config.bind_addr = addr.parse().context("invalid TRANSCRIBER_BIND address")?;
        }
        if let Some(url) = env_opt("TRANSCRIBER_SQLITE_PATH") {
            config.database_url = url;
        }
        if let Some(dir) = env_opt("CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_opt("TRANSCRIBER_LOG_DIR") {
            config.log_dir = dir;
        }
        if let Some(n) = env_opt("MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = n.parse().context("invalid MAX_UPLOAD_BYTES")?;
        }
        if let Some(n) = env_opt("FETCH_TIMEOUT_SECS") {
            config.fetch_timeout = Duration::from_secs(n.parse().context("invalid FETCH_TIMEOUT_SECS")?);
        }
        if let Some(n) = env_opt("WORKER_COUNT") {
            config.worker_count = n.parse().context("invalid WORKER_COUNT")?;
        }
        if let Some(n) = env_opt("CACHE_EXPIRY") {
            config.retention = Duration::from_secs(n.parse().context("invalid CACHE_EXPIRY")?);
        }
        if let Some(n) = env_opt("STALE_AFTER_SECS") {
            config.stale_after = Duration::from_secs(n.parse().context("invalid STALE_AFTER_SECS")?);
        }
        if let Some(n) = env_opt("SWEEP_INTERVAL_SECS") {
            config.sweep_interval = Duration::from_secs(n.parse().context("invalid SWEEP_INTERVAL_SECS")?);
        }

        config.remote = match (
            env_opt("S3_STORAGE_BUCKET"),
            env_opt("AWS_ACCESS_KEY_ID"),
            env_opt("AWS_SECRET_ACCESS_KEY"),
        ) {
            (Some(bucket), Some(access_key), Some(secret_key)) => Some(RemoteConfig {
                bucket,
                region: env_opt("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                endpoint: env_opt("AWS_ENDPOINT"),
                access_key,
                secret_key,
            }),
            _ => None,
        };

        Ok(config)
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}
