#![allow(clippy::uninlined_format_args)]

use std::fs;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use transcriber_rs::config::Config;
use transcriber_rs::schedule::{ExpiryReaper, TaskManager, TaskScheduler, TranscribeProcessor};
use transcriber_rs::storage::cache::CacheStore;
use transcriber_rs::storage::remote::{RemoteStore, S3RemoteStore};
use transcriber_rs::storage::task::sqlite::SqliteTaskStorage;
use transcriber_rs::utils::logger;
use transcriber_rs::{web, AppContext};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(Config::from_env()?);
    let _guard = logger::init(config.log_dir.clone())?;

    info!("Starting transcription service...");

    if let Some(dir) = sqlite_parent_dir(&config.database_url) {
        fs::create_dir_all(dir)?;
    }

    info!("Initializing storage...");
    let storage = Arc::new(SqliteTaskStorage::new(&config.database_url).await?);
    let cache = Arc::new(CacheStore::new(config.cache_dir.clone()));
    cache.ensure_root().await?;

    let remote: Option<Arc<dyn RemoteStore>> = match &config.remote {
        Some(remote_config) => Some(Arc::new(S3RemoteStore::new(remote_config)?)),
        None => {
            info!("Remote storage not configured, running local-only");
            None
        }
    };

    info!("Initializing task manager...");
    let task_manager = Arc::new(TaskManager::new(
        storage.clone(),
        cache.clone(),
        remote,
        config.clone(),
    )?);

    info!("Starting {} worker(s)...", config.worker_count);
    let scheduler = TaskScheduler::new(task_manager.clone());
    scheduler
        .spawn_workers(config.worker_count, Arc::new(TranscribeProcessor::new()))
        .await;
    tokio::spawn(async move {
        let _ = scheduler.run().await;
    });

    let reaper = ExpiryReaper::new(storage, cache, &config);
    tokio::spawn(async move {
        reaper.run().await;
    });

    let ctx = Arc::new(AppContext::new(config.clone(), task_manager));

    info!("Starting HTTP server at http://{}", config.bind_addr);
    match web::start_server(ctx, config.bind_addr).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            tracing::error!("Server error: {}", e);
            return Err(e);
        }
    }

    Ok(())
}

/// Directory holding the sqlite file, for `sqlite://path?options` URLs.
fn sqlite_parent_dir(database_url: &str) -> Option<&str> {
    let path = database_url.strip_prefix("sqlite://")?;
    let path = path.split('?').next()?;
    match path.rfind('/') {
        Some(0) | None => None,
        Some(idx) => Some(&path[..idx]),
    }
}
