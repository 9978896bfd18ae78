use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::storage::cache::CacheStore;
use crate::storage::task::TaskStorage;

/// Outcome of one sweep. Per-task failures are collected here and never
/// abort the rest of the sweep.
#[derive(Debug, Default, Serialize)]
pub struct SweepStats {
    pub examined: usize,
    pub marked_stale: usize,
    pub reclaimed: usize,
    pub orphan_entries_removed: usize,
    pub errors: Vec<String>,
}

/// Periodic garbage collector. Reclaims files and metadata in lockstep
/// once a task outlives the retention window, regardless of how the
/// task ended, and force-fails tasks abandoned in a non-terminal state.
/// Remote-stored artifacts are never touched.
pub struct ExpiryReaper {
    storage: Arc<dyn TaskStorage>,
    cache: Arc<CacheStore>,
    retention: Duration,
    stale_after: Duration,
    interval: std::time::Duration,
}

impl ExpiryReaper {
    pub fn new(storage: Arc<dyn TaskStorage>, cache: Arc<CacheStore>, config: &Config) -> Self {
        Self {
            storage,
            cache,
            retention: Duration::from_std(config.retention).unwrap_or(Duration::days(7)),
            stale_after: Duration::from_std(config.stale_after).unwrap_or(Duration::hours(6)),
            interval: config.sweep_interval,
        }
    }

    pub async fn run(&self) {
        loop {
            let stats = self.sweep().await;
            info!(
                "Sweep finished: {} examined, {} stale, {} reclaimed, {} orphans, {} errors",
                stats.examined,
                stats.marked_stale,
                stats.reclaimed,
                stats.orphan_entries_removed,
                stats.errors.len()
            );
            tokio::time::sleep(self.interval).await;
        }
    }

    pub async fn sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        let now = Utc::now();

        let ids = match self.storage.list_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Sweep aborted, registry scan failed: {}", e);
                stats.errors.push(format!("registry scan: {}", e));
                return stats;
            }
        };

        for id in ids {
            if let Err(e) = self.sweep_task(&id, now, &mut stats).await {
                warn!("Sweep of task {} failed: {}", id, e);
                stats.errors.push(format!("{}: {}", id, e));
            }
        }

        self.remove_orphan_entries(&mut stats).await;
        stats
    }

    async fn sweep_task(
        &self,
        task_id: &str,
        now: chrono::DateTime<Utc>,
        stats: &mut SweepStats,
    ) -> anyhow::Result<()> {
        // Records can disappear between the scan and the read.
        let Some(task) = self.storage.get(task_id).await? else {
            return Ok(());
        };
        stats.examined += 1;
        let age = task.age(now);

        // Stuck tasks are failed first; the age rule reclaims them on a
        // later sweep once past the retention window.
        if !task.status.is_terminal() && age > self.stale_after {
            let status = task.status;
            warn!(
                "Task {} abandoned in {} for {}h, marking failed",
                task.id,
                status,
                age.num_hours()
            );
            self.storage
                .update(
                    task_id,
                    Box::new(move |t| {
                        t.fail(format!("abandoned: stuck in {} past the staleness threshold", status))?;
                        Ok(())
                    }),
                )
                .await?;
            stats.marked_stale += 1;
        }

        if age > self.retention {
            let files = self.cache.remove_entry(task_id).await?;
            if files == 0 && !task.outputs.is_empty() {
                // Record claimed artifacts the cache no longer holds.
                warn!("Task {} had a registry record but no cache entry", task_id);
            }
            self.storage.delete(task_id).await?;
            info!("Reclaimed expired task {} ({} files)", task_id, files);
            stats.reclaimed += 1;
        }

        Ok(())
    }

    /// Cache directories whose registry record is gone are the other
    /// half of the same inconsistency; remove them too.
    async fn remove_orphan_entries(&self, stats: &mut SweepStats) {
        let entries = match self.cache.list_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                stats.errors.push(format!("cache scan: {}", e));
                return;
            }
        };

        for name in entries {
            // A submission in flight has its entry before its record;
            // only fresh-looking directories get the benefit of the doubt.
            if let Ok(meta) = tokio::fs::metadata(self.cache.entry_dir(&name)).await {
                let young = meta
                    .modified()
                    .ok()
                    .and_then(|m| m.elapsed().ok())
                    .map(|age| age < self.stale_after.to_std().unwrap_or_default())
                    .unwrap_or(false);
                if young {
                    continue;
                }
            }
            match self.storage.get(&name).await {
                Ok(Some(_)) => {}
                Ok(None) => match self.cache.remove_entry(&name).await {
                    Ok(files) => {
                        warn!("Removed orphan cache entry {} ({} files)", name, files);
                        stats.orphan_entries_removed += 1;
                    }
                    Err(e) => stats.errors.push(format!("orphan {}: {}", name, e)),
                },
                Err(e) => stats.errors.push(format!("orphan lookup {}: {}", name, e)),
            }
        }
    }
}
